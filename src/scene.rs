//! Entity group and the rendering boundary
//!
//! The core never draws. It builds primitives through a [`RenderBackend`],
//! keeps the resulting entities in one [`EntityGroup`], and tells the backend
//! to release a primitive when its entity leaves the group.

use crate::projection::CartesianPoint;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use tracing::{debug, warn};

/// 24-bit colour, `0xRRGGBB`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb(pub u32);

impl Rgb {
    pub const fn r(&self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    pub const fn g(&self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub const fn b(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

/// Palette used by the display modes and the simulator
pub mod palette {
    use super::Rgb;

    pub const ATTACK_RED: Rgb = Rgb(0xf85149);
    pub const TARGET_WHITE: Rgb = Rgb(0xffffff);
    pub const AGRI_GREEN: Rgb = Rgb(0x10b981);
    pub const SPACE_BLUE: Rgb = Rgb(0x3b82f6);
    pub const CLIMATE_CYAN: Rgb = Rgb(0x39c5bb);
    pub const HOT_RED: Rgb = Rgb(0xff4444);
    pub const COLD_BLUE: Rgb = Rgb(0x4444ff);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Point,
    Line,
}

/// Backend-side handle for a built primitive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(pub u64);

/// What the core needs from a rendering engine.
pub trait RenderBackend {
    /// Build a point (marker) or line (arc) primitive.
    fn build(&mut self, kind: PrimitiveKind, points: &[CartesianPoint], color: Rgb) -> PrimitiveId;

    /// Release the geometry/material behind a primitive.
    fn release(&mut self, id: PrimitiveId);
}

/// Backend that only keeps books on live primitives.
///
/// Used by the terminal front-end (which draws straight from the group) and
/// by tests to check that every primitive is released exactly once.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    next_id: u64,
    live: HashSet<PrimitiveId>,
    built: usize,
    released: usize,
    double_releases: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn built(&self) -> usize {
        self.built
    }

    pub fn released(&self) -> usize {
        self.released
    }

    /// Releases of a primitive that was already gone. Always zero unless the
    /// group has a lifecycle bug.
    pub fn double_releases(&self) -> usize {
        self.double_releases
    }
}

impl RenderBackend for MemoryBackend {
    fn build(&mut self, _kind: PrimitiveKind, _points: &[CartesianPoint], _color: Rgb) -> PrimitiveId {
        self.next_id += 1;
        let id = PrimitiveId(self.next_id);
        self.live.insert(id);
        self.built += 1;
        id
    }

    fn release(&mut self, id: PrimitiveId) {
        if self.live.remove(&id) {
            self.released += 1;
        } else {
            self.double_releases += 1;
            warn!(?id, "primitive released twice");
        }
    }
}

/// Lets the owner keep a handle on a backend after boxing it into a group.
impl<B: RenderBackend> RenderBackend for Rc<RefCell<B>> {
    fn build(&mut self, kind: PrimitiveKind, points: &[CartesianPoint], color: Rgb) -> PrimitiveId {
        self.borrow_mut().build(kind, points, color)
    }

    fn release(&mut self, id: PrimitiveId) {
        self.borrow_mut().release(id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Marker,
    Arc,
}

impl EntityKind {
    fn primitive(&self) -> PrimitiveKind {
        match self {
            EntityKind::Marker => PrimitiveKind::Point,
            EntityKind::Arc => PrimitiveKind::Line,
        }
    }
}

/// A transient visual entity owned by the group
#[derive(Clone, Debug)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub points: Vec<CartesianPoint>,
    pub color: Rgb,
    pub created_at_ms: u64,
    pub ttl_ms: Option<u64>,
    primitive: PrimitiveId,
}

impl Entity {
    pub fn primitive(&self) -> PrimitiveId {
        self.primitive
    }
}

/// The single container of all transient entities.
pub struct EntityGroup {
    backend: Box<dyn RenderBackend>,
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
}

impl EntityGroup {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            backend,
            entities: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Build the entity's primitive and add it to the group.
    pub fn insert(
        &mut self,
        kind: EntityKind,
        points: Vec<CartesianPoint>,
        color: Rgb,
        created_at_ms: u64,
        ttl_ms: Option<u64>,
    ) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        let primitive = self.backend.build(kind.primitive(), &points, color);
        self.entities.insert(
            id,
            Entity {
                id,
                kind,
                points,
                color,
                created_at_ms,
                ttl_ms,
                primitive,
            },
        );
        debug!(?id, ?kind, "entity added");
        id
    }

    /// Remove one entity and release its primitive. Returns false when the
    /// entity is no longer in the group.
    pub fn dispose(&mut self, id: EntityId) -> bool {
        match self.entities.remove(&id) {
            Some(entity) => {
                self.backend.release(entity.primitive);
                debug!(?id, kind = ?entity.kind, "entity disposed");
                true
            }
            None => false,
        }
    }

    /// Dispose everything. Returns how many entities were removed.
    pub fn dispose_all(&mut self) -> usize {
        let entities = std::mem::take(&mut self.entities);
        let count = entities.len();
        for entity in entities.into_values() {
            self.backend.release(entity.primitive);
        }
        count
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }
}

impl Drop for EntityGroup {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Shared = Rc<RefCell<MemoryBackend>>;

    fn point() -> Vec<CartesianPoint> {
        vec![CartesianPoint::new(1.0, 0.0, 0.0)]
    }

    #[test]
    fn rgb_channels() {
        let c = Rgb(0xf85149);
        assert_eq!((c.r(), c.g(), c.b()), (0xf8, 0x51, 0x49));
    }

    #[test]
    fn dispose_releases_exactly_once() {
        let backend = Shared::default();
        let mut group = EntityGroup::new(Box::new(backend.clone()));
        let id = group.insert(EntityKind::Marker, point(), palette::ATTACK_RED, 0, None);

        assert!(group.dispose(id));
        assert!(!group.dispose(id));

        let books = backend.borrow();
        assert_eq!(books.released(), 1);
        assert_eq!(books.double_releases(), 0);
    }

    #[test]
    fn dispose_all_empties_group() {
        let backend = Shared::default();
        let mut group = EntityGroup::new(Box::new(backend.clone()));
        for t in 0..3 {
            group.insert(EntityKind::Marker, point(), palette::SPACE_BLUE, t, None);
        }
        assert_eq!(group.dispose_all(), 3);
        assert_eq!(group.dispose_all(), 0);
        assert!(group.is_empty());
        assert_eq!(backend.borrow().live(), 0);
    }

    #[test]
    fn dropping_group_releases_remaining_entities() {
        let backend = Shared::default();
        {
            let mut group = EntityGroup::new(Box::new(backend.clone()));
            group.insert(EntityKind::Arc, point(), palette::ATTACK_RED, 0, Some(2000));
        }
        assert_eq!(backend.borrow().live(), 0);
        assert_eq!(backend.borrow().released(), 1);
    }

    #[test]
    fn iteration_follows_creation_order() {
        let mut group = EntityGroup::new(Box::new(MemoryBackend::new()));
        let a = group.insert(EntityKind::Marker, point(), palette::ATTACK_RED, 0, None);
        let b = group.insert(EntityKind::Arc, point(), palette::ATTACK_RED, 5, Some(2000));
        let ids: Vec<_> = group.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
