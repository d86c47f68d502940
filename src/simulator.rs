//! Self-rescheduling event simulation
//!
//! While running, each cycle picks a random source/destination pair, drops a
//! marker at the source, a delayed marker at the destination and an arc
//! between them, then schedules the next cycle after a jittered delay.

use crate::arcs::{ArcAnimator, SceneHost};
use crate::markers::MarkerPolicy;
use crate::projection::GeoPoint;
use crate::scene::{palette, Rgb};
use crate::scheduler::CancelToken;
use clap::ValueEnum;
use rand::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulatorState {
    Idle,
    Running,
}

/// What `stop()` does with work that is already scheduled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Only future cycles stop. Pending destination markers and arc
    /// disposals still run.
    Drain,
    /// Every pending timer of the run is cancelled and the group is cleared.
    #[default]
    CancelAll,
}

#[derive(Clone, Copy, Debug)]
pub struct SimulatorConfig {
    pub max_abs_lat: f64,
    pub target_delay_ms: u64,
    pub arc_ttl_ms: u64,
    pub min_cycle_ms: u64,
    pub max_cycle_ms: u64,
    pub source_color: Rgb,
    pub target_color: Rgb,
    pub arc_color: Rgb,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_abs_lat: 80.0,
            target_delay_ms: 1000,
            arc_ttl_ms: 2000,
            min_cycle_ms: 500,
            max_cycle_ms: 2500,
            source_color: palette::ATTACK_RED,
            target_color: palette::TARGET_WHITE,
            arc_color: palette::ATTACK_RED,
        }
    }
}

/// A context the simulator can drive
pub trait SimulationHost: SceneHost {
    fn simulator(&mut self) -> &mut EventSimulator;
}

pub struct EventSimulator {
    state: SimulatorState,
    policy: StopPolicy,
    config: SimulatorConfig,
    animator: ArcAnimator,
    token: CancelToken,
    rng: StdRng,
    cycles: u64,
}

impl EventSimulator {
    pub fn new(config: SimulatorConfig, policy: StopPolicy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            state: SimulatorState::Idle,
            policy,
            config,
            animator: ArcAnimator::default(),
            token: CancelToken::new(),
            rng,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SimulatorState {
        self.state
    }

    pub fn policy(&self) -> StopPolicy {
        self.policy
    }

    /// Cycles completed since creation
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Idle -> Running and fire the first cycle right away. No-op while
    /// already running.
    pub fn start<C: SimulationHost + 'static>(ctx: &mut C) {
        let sim = ctx.simulator();
        if sim.state == SimulatorState::Running {
            return;
        }
        sim.state = SimulatorState::Running;
        sim.token = CancelToken::new();
        let token = sim.token.clone();
        info!(policy = ?sim.policy, "event simulation started");

        run_cycle(ctx, token);
    }

    /// Running -> Idle. Under [`StopPolicy::Drain`] only the next cycle is
    /// prevented; under [`StopPolicy::CancelAll`] all pending work of the run
    /// is cancelled and the group cleared.
    pub fn stop<C: SimulationHost>(ctx: &mut C) {
        let sim = ctx.simulator();
        if sim.state == SimulatorState::Idle {
            return;
        }
        sim.state = SimulatorState::Idle;
        sim.token.cancel();
        let policy = sim.policy;
        info!(?policy, cycles = sim.cycles, "event simulation stopped");

        if policy == StopPolicy::CancelAll {
            ctx.registry().clear();
        }
    }

    fn random_point(&mut self) -> GeoPoint {
        let lat = self.rng.gen_range(-self.config.max_abs_lat..self.config.max_abs_lat);
        let lon = self.rng.gen_range(-180.0..180.0);
        debug_assert!(lat.abs() <= 90.0 && (-180.0..180.0).contains(&lon));
        GeoPoint::new(lat, lon)
    }

    /// Token to attach to timers so `stop()` can cancel them
    fn timer_token(&self, run: &CancelToken) -> Option<CancelToken> {
        match self.policy {
            StopPolicy::Drain => None,
            StopPolicy::CancelAll => Some(run.clone()),
        }
    }
}

fn run_cycle<C: SimulationHost + 'static>(ctx: &mut C, run: CancelToken) {
    // Coarse guard: a stopped run ends here, at the start of its next cycle
    if run.is_cancelled() {
        debug!("cycle skipped, run was stopped");
        return;
    }

    let sim = ctx.simulator();
    let src = sim.random_point();
    let dst = sim.random_point();
    let config = sim.config;
    let animator = sim.animator;
    let timer_token = sim.timer_token(&run);

    let now_ms = ctx.scheduler().now_ms();
    ctx.registry()
        .spawn(src, config.source_color, MarkerPolicy::Accumulate, now_ms);

    ctx.scheduler().schedule(
        config.target_delay_ms,
        "target-marker",
        timer_token.clone(),
        move |ctx: &mut C| {
            let now_ms = ctx.scheduler().now_ms();
            ctx.registry()
                .spawn(dst, config.target_color, MarkerPolicy::Accumulate, now_ms);
        },
    );

    animator.draw_arc(ctx, src, dst, config.arc_color, config.arc_ttl_ms, timer_token.clone());

    let sim = ctx.simulator();
    sim.cycles += 1;
    debug!(cycle = sim.cycles, %src, %dst, "simulation cycle");

    if sim.state == SimulatorState::Running && !run.is_cancelled() {
        let delay = sim.rng.gen_range(config.min_cycle_ms..config.max_cycle_ms);
        ctx.scheduler()
            .schedule(delay, "sim-cycle", timer_token, move |ctx: &mut C| run_cycle(ctx, run));
    } else {
        sim.state = SimulatorState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::MarkerRegistry;
    use crate::projection::SphereRadius;
    use crate::scene::{EntityKind, MemoryBackend};
    use crate::scheduler::{Scheduled, Scheduler};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Host {
        scheduler: Scheduler<Host>,
        registry: MarkerRegistry,
        simulator: EventSimulator,
    }

    impl Scheduled for Host {
        fn scheduler(&mut self) -> &mut Scheduler<Self> {
            &mut self.scheduler
        }
    }

    impl SceneHost for Host {
        fn registry(&mut self) -> &mut MarkerRegistry {
            &mut self.registry
        }
    }

    impl SimulationHost for Host {
        fn simulator(&mut self) -> &mut EventSimulator {
            &mut self.simulator
        }
    }

    fn host(policy: StopPolicy) -> (Host, Rc<RefCell<MemoryBackend>>) {
        host_with(SimulatorConfig::default(), policy)
    }

    fn host_with(config: SimulatorConfig, policy: StopPolicy) -> (Host, Rc<RefCell<MemoryBackend>>) {
        let backend = Rc::new(RefCell::new(MemoryBackend::new()));
        let host = Host {
            scheduler: Scheduler::new(),
            registry: MarkerRegistry::new(Box::new(backend.clone()), SphereRadius::new(5.0).unwrap()),
            simulator: EventSimulator::new(config, policy, Some(7)),
        };
        (host, backend)
    }

    fn count(host: &Host, kind: EntityKind) -> usize {
        host.registry.group().iter().filter(|e| e.kind == kind).count()
    }

    #[test]
    fn start_fires_first_cycle_immediately() {
        let (mut host, _) = host(StopPolicy::CancelAll);
        EventSimulator::start(&mut host);

        assert_eq!(host.simulator.state(), SimulatorState::Running);
        assert_eq!(host.simulator.cycles(), 1);
        assert_eq!(count(&host, EntityKind::Marker), 1);
        assert_eq!(count(&host, EntityKind::Arc), 1);
        // target marker, arc disposal, next cycle
        assert_eq!(host.scheduler.pending(), 3);
    }

    #[test]
    fn start_is_idempotent() {
        let (mut host, _) = host(StopPolicy::CancelAll);
        EventSimulator::start(&mut host);
        EventSimulator::start(&mut host);
        assert_eq!(host.simulator.cycles(), 1);
        assert_eq!(host.scheduler.pending(), 3);
    }

    #[test]
    fn target_marker_appears_after_delay() {
        let (mut host, _) = host(StopPolicy::CancelAll);
        EventSimulator::start(&mut host);
        host.advance(499);
        assert_eq!(count(&host, EntityKind::Marker), 1);
        // The next cycle can fire before 1000ms; count only white markers
        host.advance(501);
        let targets = host
            .registry
            .group()
            .iter()
            .filter(|e| e.color == palette::TARGET_WHITE)
            .count();
        assert_eq!(targets, 1);
    }

    #[test]
    fn generated_points_stay_in_range() {
        let mut sim = EventSimulator::new(SimulatorConfig::default(), StopPolicy::Drain, Some(1));
        for _ in 0..10_000 {
            let p = sim.random_point();
            assert!((-80.0..80.0).contains(&p.lat()));
            assert!((-180.0..180.0).contains(&p.lon()));
        }
    }

    #[test]
    fn cycles_keep_coming_while_running() {
        let (mut host, backend) = host(StopPolicy::CancelAll);
        EventSimulator::start(&mut host);

        for _ in 0..100 {
            host.advance(100);
            let now = host.scheduler.now_ms();
            for arc in host.registry.group().iter().filter(|e| e.kind == EntityKind::Arc) {
                assert!(now - arc.created_at_ms < 2000, "arc outlived its ttl");
            }
        }
        // At most 2500ms between cycles over 10s
        assert!(host.simulator.cycles() >= 5);
        assert_eq!(backend.borrow().double_releases(), 0);
    }

    #[test]
    fn drain_stop_lets_scheduled_work_finish() {
        let (mut host, backend) = host(StopPolicy::Drain);
        EventSimulator::start(&mut host);
        EventSimulator::stop(&mut host);
        assert_eq!(host.simulator.state(), SimulatorState::Idle);

        host.advance(5000);
        assert_eq!(host.simulator.cycles(), 1);
        // source and delayed target markers, arc disposed on schedule
        assert_eq!(count(&host, EntityKind::Marker), 2);
        assert_eq!(count(&host, EntityKind::Arc), 0);
        assert_eq!(backend.borrow().released(), 1);
    }

    #[test]
    fn cancel_all_stop_drops_everything() {
        let (mut host, backend) = host(StopPolicy::CancelAll);
        EventSimulator::start(&mut host);
        EventSimulator::stop(&mut host);
        assert!(host.registry.is_empty());

        assert_eq!(host.advance(5000), 0);
        assert_eq!(host.simulator.cycles(), 1);
        assert!(host.registry.is_empty());
        assert_eq!(backend.borrow().live(), 0);
        assert_eq!(backend.borrow().double_releases(), 0);
    }

    #[test]
    fn restart_does_not_revive_old_cycle_chain() {
        let config = SimulatorConfig {
            min_cycle_ms: 1000,
            max_cycle_ms: 1001,
            ..SimulatorConfig::default()
        };
        let (mut host, _) = host_with(config, StopPolicy::Drain);
        EventSimulator::start(&mut host);
        EventSimulator::stop(&mut host);
        EventSimulator::start(&mut host);
        assert_eq!(host.simulator.cycles(), 2);

        // Both runs left a cycle due at 1000ms; only the live run's one goes on
        host.advance(1000);
        assert_eq!(host.simulator.cycles(), 3);
        host.advance(1000);
        assert_eq!(host.simulator.cycles(), 4);
    }
}
