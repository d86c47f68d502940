//! Point markers on the globe

use crate::projection::{forward, CartesianPoint, GeoPoint, SphereRadius};
use crate::scene::{EntityGroup, EntityId, EntityKind, RenderBackend, Rgb};
use serde::Deserialize;
use tracing::debug;

/// Markers float slightly above the surface so they are not z-fought by it
pub const MARKER_LIFT: f64 = 1.05;

/// Whether spawning a marker first clears what is already shown
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerPolicy {
    /// Single-focus modes: the new marker replaces everything in the group
    Replace,
    /// Keep earlier markers and arcs visible
    Accumulate,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Marker {
    pub id: EntityId,
    pub position: CartesianPoint,
    pub color: Rgb,
    pub created_at_ms: u64,
    pub ttl_ms: Option<u64>,
}

/// Owns the entity group and the radius of the body currently displayed.
pub struct MarkerRegistry {
    group: EntityGroup,
    radius: SphereRadius,
}

impl MarkerRegistry {
    pub fn new(backend: Box<dyn RenderBackend>, radius: SphereRadius) -> Self {
        Self {
            group: EntityGroup::new(backend),
            radius,
        }
    }

    pub fn radius(&self) -> SphereRadius {
        self.radius
    }

    /// Switch to another body's radius. Entities already in the group keep
    /// the geometry they were built with.
    pub fn set_radius(&mut self, radius: SphereRadius) {
        self.radius = radius;
    }

    pub fn spawn(&mut self, point: GeoPoint, color: Rgb, policy: MarkerPolicy, now_ms: u64) -> Marker {
        if policy == MarkerPolicy::Replace {
            self.clear();
        }

        let position = forward(point, self.radius).scale(MARKER_LIFT);
        let id = self
            .group
            .insert(EntityKind::Marker, vec![position], color, now_ms, None);
        debug!(?id, %point, "marker spawned");

        Marker {
            id,
            position,
            color,
            created_at_ms: now_ms,
            ttl_ms: None,
        }
    }

    /// Dispose every marker and arc. Safe to call on an empty group.
    pub fn clear(&mut self) -> usize {
        let removed = self.group.dispose_all();
        if removed > 0 {
            debug!(removed, "group cleared");
        }
        removed
    }

    /// Dispose a single entity; a no-op when it is already gone.
    pub fn dispose(&mut self, id: EntityId) -> bool {
        self.group.dispose(id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.group.contains(id)
    }

    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    pub fn group(&self) -> &EntityGroup {
        &self.group
    }

    pub(crate) fn group_mut(&mut self) -> &mut EntityGroup {
        &mut self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{palette, MemoryBackend};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn registry() -> (MarkerRegistry, Rc<RefCell<MemoryBackend>>) {
        let backend = Rc::new(RefCell::new(MemoryBackend::new()));
        let radius = SphereRadius::new(5.0).unwrap();
        (MarkerRegistry::new(Box::new(backend.clone()), radius), backend)
    }

    #[test]
    fn spawn_then_clear_leaves_group_empty() {
        let (mut reg, backend) = registry();
        reg.spawn(GeoPoint::new(40.71, -74.0), palette::SPACE_BLUE, MarkerPolicy::Accumulate, 0);
        assert_eq!(reg.len(), 1);

        assert_eq!(reg.clear(), 1);
        assert!(reg.is_empty());
        assert_eq!(reg.clear(), 0);
        assert!(reg.is_empty());
        assert_eq!(backend.borrow().live(), 0);
        assert_eq!(backend.borrow().double_releases(), 0);
    }

    #[test]
    fn marker_sits_above_surface() {
        let (mut reg, _) = registry();
        let m = reg.spawn(GeoPoint::new(51.5, -0.12), palette::CLIMATE_CYAN, MarkerPolicy::Accumulate, 10);
        assert!((m.position.length() - 5.0 * MARKER_LIFT).abs() < 1e-9);
        assert_eq!(m.created_at_ms, 10);
        assert_eq!(m.ttl_ms, None);
    }

    #[test]
    fn replace_policy_keeps_only_latest() {
        let (mut reg, backend) = registry();
        let first = reg.spawn(GeoPoint::new(0.0, 0.0), palette::AGRI_GREEN, MarkerPolicy::Replace, 0);
        let second = reg.spawn(GeoPoint::new(10.0, 10.0), palette::AGRI_GREEN, MarkerPolicy::Replace, 1);

        assert!(!reg.contains(first.id));
        assert!(reg.contains(second.id));
        assert_eq!(reg.len(), 1);
        assert_eq!(backend.borrow().released(), 1);
    }

    #[test]
    fn accumulate_policy_keeps_all() {
        let (mut reg, _) = registry();
        for i in 0..4 {
            reg.spawn(GeoPoint::new(i as f64, 0.0), palette::ATTACK_RED, MarkerPolicy::Accumulate, i);
        }
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn radius_change_keeps_old_geometry() {
        let (mut reg, _) = registry();
        let before = reg.spawn(GeoPoint::new(0.0, 0.0), palette::SPACE_BLUE, MarkerPolicy::Accumulate, 0);
        reg.set_radius(SphereRadius::new(7.0).unwrap());
        let after = reg.spawn(GeoPoint::new(0.0, 0.0), palette::SPACE_BLUE, MarkerPolicy::Accumulate, 0);

        let stored = reg.group().get(before.id).unwrap();
        assert!(stored.points[0].approx_eq(&before.position, 1e-12));
        assert!((after.position.length() - 7.0 * MARKER_LIFT).abs() < 1e-9);
    }

    #[test]
    fn disposing_missing_marker_is_noop() {
        let (mut reg, _) = registry();
        let m = reg.spawn(GeoPoint::new(0.0, 0.0), palette::SPACE_BLUE, MarkerPolicy::Accumulate, 0);
        reg.clear();
        assert!(!reg.dispose(m.id));
    }
}
