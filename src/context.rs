//! The globe context: one owner for everything the pages share
//!
//! Holds the scheduler, the marker registry, the simulator, the displayed
//! body and the active display mode. Components get it by reference instead
//! of reaching for global scene/page state.

use crate::analysis::{temperature_color, StationReading};
use crate::arcs::SceneHost;
use crate::markers::{Marker, MarkerPolicy, MarkerRegistry};
use crate::projection::{inverse, CartesianPoint, GeoPoint, SphereRadius};
use crate::scene::{palette, EntityGroup, RenderBackend, Rgb};
use crate::scheduler::{Scheduled, Scheduler};
use crate::simulator::{EventSimulator, SimulationHost, SimulatorState};
use clap::ValueEnum;
use serde::Deserialize;
use tracing::info;

/// Bodies the globe can display
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    #[default]
    Earth,
    Mars,
    Jupiter,
}

impl Body {
    pub const ALL: [Body; 3] = [Body::Earth, Body::Mars, Body::Jupiter];

    pub fn radius(&self) -> SphereRadius {
        match self {
            Body::Earth => SphereRadius::constant(5.0),
            Body::Mars => SphereRadius::constant(3.5),
            Body::Jupiter => SphereRadius::constant(7.0),
        }
    }

    pub fn has_atmosphere(&self) -> bool {
        !matches!(self, Body::Jupiter)
    }

    pub fn accent(&self) -> Rgb {
        match self {
            Body::Earth => Rgb(0x2f81f7),
            Body::Mars => Rgb(0xe27b58),
            Body::Jupiter => Rgb(0xd39c7e),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Body::Earth => "earth",
            Body::Mars => "mars",
            Body::Jupiter => "jupiter",
        }
    }

    pub fn next(&self) -> Body {
        match self {
            Body::Earth => Body::Mars,
            Body::Mars => Body::Jupiter,
            Body::Jupiter => Body::Earth,
        }
    }
}

/// UI pages; each one decides how the globe reacts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Home,
    Agri,
    Space,
    Climate,
    Cyber,
    Edtech,
}

/// Per-mode behaviour, so nothing downstream matches on mode names
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModeProfile {
    /// Marker dropped where the globe is clicked, if any
    pub click_color: Option<Rgb>,
    pub click_policy: MarkerPolicy,
    pub drives_simulation: bool,
    pub auto_rotate: bool,
    /// Clicks also ask for an area analysis and the local air quality
    pub analyzes_clicks: bool,
    /// Reference weather stations are shown while in this mode
    pub fetches_stations: bool,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 6] = [
        DisplayMode::Home,
        DisplayMode::Agri,
        DisplayMode::Space,
        DisplayMode::Climate,
        DisplayMode::Cyber,
        DisplayMode::Edtech,
    ];

    pub fn profile(&self) -> ModeProfile {
        let base = ModeProfile {
            click_color: None,
            click_policy: MarkerPolicy::Replace,
            drives_simulation: false,
            auto_rotate: false,
            analyzes_clicks: false,
            fetches_stations: false,
        };
        match self {
            DisplayMode::Home => ModeProfile { auto_rotate: true, ..base },
            DisplayMode::Agri => ModeProfile {
                click_color: Some(palette::AGRI_GREEN),
                analyzes_clicks: true,
                ..base
            },
            DisplayMode::Space => ModeProfile { click_color: Some(palette::SPACE_BLUE), ..base },
            DisplayMode::Climate => ModeProfile {
                click_color: Some(palette::CLIMATE_CYAN),
                fetches_stations: true,
                ..base
            },
            DisplayMode::Cyber => ModeProfile {
                click_policy: MarkerPolicy::Accumulate,
                drives_simulation: true,
                auto_rotate: true,
                ..base
            },
            DisplayMode::Edtech => base,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DisplayMode::Home => "home",
            DisplayMode::Agri => "agri",
            DisplayMode::Space => "space",
            DisplayMode::Climate => "climate",
            DisplayMode::Cyber => "cyber",
            DisplayMode::Edtech => "edtech",
        }
    }

    pub fn next(&self) -> DisplayMode {
        let idx = Self::ALL.iter().position(|m| m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

pub struct GlobeContext {
    scheduler: Scheduler<GlobeContext>,
    registry: MarkerRegistry,
    simulator: EventSimulator,
    body: Body,
    mode: DisplayMode,
}

impl GlobeContext {
    pub fn new(backend: Box<dyn RenderBackend>, body: Body, simulator: EventSimulator) -> Self {
        Self {
            scheduler: Scheduler::new(),
            registry: MarkerRegistry::new(backend, body.radius()),
            simulator,
            body,
            mode: DisplayMode::Home,
        }
    }

    pub fn body(&self) -> Body {
        self.body
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn radius(&self) -> SphereRadius {
        self.registry.radius()
    }

    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    pub fn group(&self) -> &EntityGroup {
        self.registry.group()
    }

    pub fn simulator_state(&self) -> SimulatorState {
        self.simulator.state()
    }

    pub fn simulation_cycles(&self) -> u64 {
        self.simulator.cycles()
    }

    /// Enter `mode`: stop the simulation, clear the globe, then start the
    /// simulation again if the new mode drives it.
    pub fn switch_mode(&mut self, mode: DisplayMode) {
        info!(from = self.mode.name(), to = mode.name(), "switching display mode");
        EventSimulator::stop(self);
        self.registry.clear();
        self.mode = mode;

        if mode.profile().drives_simulation {
            EventSimulator::start(self);
        }
    }

    /// Show another body. Everything on the old globe is disposed.
    pub fn change_body(&mut self, body: Body) {
        info!(body = body.name(), "changing body");
        self.registry.clear();
        self.registry.set_radius(body.radius());
        self.body = body;
    }

    /// The rendering engine hit the globe at `hit` (model space). Returns the
    /// geographic point for analysis dispatch, plus the marker the current
    /// mode drops there, if any.
    pub fn handle_hit(&mut self, hit: CartesianPoint) -> (GeoPoint, Option<Marker>) {
        let point = inverse(hit, self.radius());
        let profile = self.mode.profile();
        let marker = profile.click_color.map(|color| {
            let now_ms = self.scheduler.now_ms();
            self.registry.spawn(point, color, profile.click_policy, now_ms)
        });
        (point, marker)
    }

    /// Drop one temperature-coloured marker per station reading.
    pub fn place_station_markers(&mut self, readings: &[StationReading]) -> Vec<Marker> {
        let now_ms = self.scheduler.now_ms();
        readings
            .iter()
            .map(|r| {
                self.registry.spawn(
                    r.point,
                    temperature_color(r.temperature_c),
                    MarkerPolicy::Accumulate,
                    now_ms,
                )
            })
            .collect()
    }
}

impl Scheduled for GlobeContext {
    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }
}

impl SceneHost for GlobeContext {
    fn registry(&mut self) -> &mut MarkerRegistry {
        &mut self.registry
    }
}

impl SimulationHost for GlobeContext {
    fn simulator(&mut self) -> &mut EventSimulator {
        &mut self.simulator
    }
}
