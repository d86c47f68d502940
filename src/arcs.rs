//! Curved arcs between two points on the globe
//!
//! An arc is a quadratic Bezier from start to end whose control point is the
//! chord midpoint pushed out to 1.5x the radius. Longer chords have a midpoint
//! deeper inside the sphere, so they get pulled up harder. It is not a
//! geodesic, just a cheap curve that clears the surface.

use crate::markers::MarkerRegistry;
use crate::projection::{forward, CartesianPoint, GeoPoint};
use crate::scene::{EntityId, EntityKind, Rgb};
use crate::scheduler::{CancelToken, Scheduled, TimerId};
use glam::DVec3;
use tracing::debug;

pub const ARC_SEGMENTS: usize = 20;
pub const ARC_LIFT: f64 = 1.5;

/// A context that can host arcs: it owns the registry and a scheduler.
pub trait SceneHost: Scheduled {
    fn registry(&mut self) -> &mut MarkerRegistry;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArcHandle {
    pub id: EntityId,
    pub start: CartesianPoint,
    pub end: CartesianPoint,
    pub control: CartesianPoint,
    pub path: Vec<CartesianPoint>,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub disposal: TimerId,
}

#[derive(Clone, Copy, Debug)]
pub struct ArcAnimator {
    pub segments: usize,
    pub lift: f64,
}

impl Default for ArcAnimator {
    fn default() -> Self {
        Self {
            segments: ARC_SEGMENTS,
            lift: ARC_LIFT,
        }
    }
}

impl ArcAnimator {
    /// Add an arc to the host's group and schedule its removal after
    /// `ttl_ms`. The removal is skipped if `token` is cancelled first, and
    /// does nothing if the arc has already left the group.
    pub fn draw_arc<C>(
        &self,
        ctx: &mut C,
        start: GeoPoint,
        end: GeoPoint,
        color: Rgb,
        ttl_ms: u64,
        token: Option<CancelToken>,
    ) -> ArcHandle
    where
        C: SceneHost + 'static,
    {
        let radius = ctx.registry().radius();
        let v1 = DVec3::from(forward(start, radius));
        let v2 = DVec3::from(forward(end, radius));
        let control = control_point(v1, v2, radius.get() * self.lift);
        let path = sample_quadratic(v1, control, v2, self.segments);

        let now_ms = ctx.scheduler().now_ms();
        let id = ctx
            .registry()
            .group_mut()
            .insert(EntityKind::Arc, path.clone(), color, now_ms, Some(ttl_ms));

        let disposal = ctx
            .scheduler()
            .schedule(ttl_ms, "arc-dispose", token, move |ctx: &mut C| {
                if !ctx.registry().dispose(id) {
                    debug!(?id, "arc already gone at disposal");
                }
            });
        debug!(?id, %start, %end, ttl_ms, "arc drawn");

        ArcHandle {
            id,
            start: v1.into(),
            end: v2.into(),
            control: control.into(),
            path,
            created_at_ms: now_ms,
            ttl_ms,
            disposal,
        }
    }
}

/// Chord midpoint pushed out to `height` from the centre.
///
/// Antipodal endpoints have a zero midpoint; the start direction is used
/// instead so the curve stays finite.
pub fn control_point(v1: DVec3, v2: DVec3, height: f64) -> DVec3 {
    let dir = ((v1 + v2) * 0.5)
        .try_normalize()
        .or_else(|| v1.try_normalize())
        .unwrap_or(DVec3::Y);
    dir * height
}

/// `segments + 1` evenly spaced points (in t) along the quadratic Bezier.
pub fn sample_quadratic(p0: DVec3, p1: DVec3, p2: DVec3, segments: usize) -> Vec<CartesianPoint> {
    let segments = segments.max(1);
    (0..=segments)
        .map(|i| {
            let t = i as f64 / segments as f64;
            let u = 1.0 - t;
            (p0 * (u * u) + p1 * (2.0 * u * t) + p2 * (t * t)).into()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::MarkerPolicy;
    use crate::projection::SphereRadius;
    use crate::scene::{palette, MemoryBackend};
    use crate::scheduler::Scheduler;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Host {
        scheduler: Scheduler<Host>,
        registry: MarkerRegistry,
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

    fn host() -> (Host, Rc<RefCell<MemoryBackend>>) {
        let backend = Rc::new(RefCell::new(MemoryBackend::new()));
        let radius = SphereRadius::new(5.0).unwrap();
        let host = Host {
            scheduler: Scheduler::new(),
            registry: MarkerRegistry::new(Box::new(backend.clone()), radius),
        };
        (host, backend)
    }

    #[test]
    fn path_has_fixed_sample_count_and_hits_endpoints() {
        let (mut host, _) = host();
        let arc = ArcAnimator::default().draw_arc(
            &mut host,
            GeoPoint::new(40.71, -74.0),
            GeoPoint::new(35.67, 139.65),
            palette::ATTACK_RED,
            2000,
            None,
        );
        assert_eq!(arc.path.len(), ARC_SEGMENTS + 1);
        assert!(arc.path[0].approx_eq(&arc.start, 1e-9));
        assert!(arc.path[ARC_SEGMENTS].approx_eq(&arc.end, 1e-9));
        assert!((arc.control.length() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn arc_is_removed_after_ttl() {
        let (mut host, backend) = host();
        let arc = ArcAnimator::default().draw_arc(
            &mut host,
            GeoPoint::new(10.0, 20.0),
            GeoPoint::new(-30.0, 100.0),
            palette::ATTACK_RED,
            2000,
            None,
        );
        assert!(host.registry.contains(arc.id));

        host.advance(1999);
        assert!(host.registry.contains(arc.id));

        host.advance(1);
        assert!(!host.registry.contains(arc.id));

        host.advance(10_000);
        assert_eq!(backend.borrow().released(), 1);
        assert_eq!(backend.borrow().double_releases(), 0);
    }

    #[test]
    fn disposal_after_clear_is_noop() {
        let (mut host, backend) = host();
        ArcAnimator::default().draw_arc(
            &mut host,
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 90.0),
            palette::ATTACK_RED,
            2000,
            None,
        );
        host.registry.spawn(GeoPoint::new(5.0, 5.0), palette::SPACE_BLUE, MarkerPolicy::Replace, 0);
        assert_eq!(host.advance(2000), 1);
        assert_eq!(host.registry.len(), 1);
        assert_eq!(backend.borrow().double_releases(), 0);
    }

    #[test]
    fn cancelled_disposal_leaves_arc_in_group() {
        let (mut host, _) = host();
        let token = CancelToken::new();
        let arc = ArcAnimator::default().draw_arc(
            &mut host,
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 90.0),
            palette::ATTACK_RED,
            2000,
            Some(token.clone()),
        );
        token.cancel();
        assert_eq!(host.advance(5000), 0);
        assert!(host.registry.contains(arc.id));
    }

    #[test]
    fn antipodal_control_point_is_finite() {
        let r = SphereRadius::new(5.0).unwrap();
        let v1 = DVec3::from(forward(GeoPoint::new(0.0, 0.0), r));
        let v2 = DVec3::from(forward(GeoPoint::new(0.0, 180.0), r));
        let c = control_point(v1, v2, 7.5);
        assert!(c.is_finite());
        assert!((c.length() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn midpoint_of_curve_is_lifted() {
        let r = SphereRadius::new(5.0).unwrap();
        let v1 = DVec3::from(forward(GeoPoint::new(0.0, -45.0), r));
        let v2 = DVec3::from(forward(GeoPoint::new(0.0, 45.0), r));
        let path = sample_quadratic(v1, control_point(v1, v2, 7.5), v2, 20);
        assert!(path[10].length() > 5.0);
    }
}
