//! Rigid bodies and the engine event log.

use dashmap::DashMap;
use glam::DVec3;
use parking_lot::Mutex;
use strata_common::{BodyHandle, ShovelHandle, TileId};

/// Bodies by handle. Only positions are simulated.
#[derive(Debug, Default)]
pub struct SimWorld {
    bodies: DashMap<BodyHandle, DVec3>,
}

impl SimWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a body at `position`.
    pub fn create_body(&self, position: DVec3) -> BodyHandle {
        let handle = BodyHandle::new();
        self.bodies.insert(handle, position);
        handle
    }

    /// Moves a body. Returns false if it does not exist.
    pub fn set_body_position(&self, body: BodyHandle, position: DVec3) -> bool {
        match self.bodies.get_mut(&body) {
            Some(mut entry) => {
                *entry = position;
                true
            },
            None => false,
        }
    }

    /// Current position of a body.
    #[must_use]
    pub fn body_position(&self, body: BodyHandle) -> Option<DVec3> {
        self.bodies.get(&body).map(|entry| *entry)
    }

    /// Removes a body. Returns false if it did not exist.
    pub fn remove_body(&self, body: BodyHandle) -> bool {
        self.bodies.remove(&body).is_some()
    }

    /// True if the body exists.
    #[must_use]
    pub fn has_body(&self, body: BodyHandle) -> bool {
        self.bodies.contains_key(&body)
    }

    /// Number of bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// True if there are no bodies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// Lifecycle events of engine objects, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// A terrain was allocated
    TerrainCreated,
    /// A terrain was released
    TerrainReleased,
    /// A pager was allocated
    PagerCreated,
    /// A pager was released
    PagerReleased,
    /// A tile finished loading
    TileLoaded(TileId),
    /// The height callback had no data for a tile
    TileRejected(TileId),
    /// A tile left the preload region
    TileUnloaded(TileId),
    /// A shovel was accepted by a terrain or pager
    ShovelAdded(ShovelHandle),
    /// A shovel was refused
    ShovelRejected(ShovelHandle),
}

/// Append-only, shared between the engine and its objects.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<SimEvent>>,
}

impl EventLog {
    /// Records an event.
    pub fn push(&self, event: SimEvent) {
        self.events.lock().push(event);
    }

    /// All events so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SimEvent> {
        self.events.lock().clone()
    }

    /// Removes all events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Position of the first matching event.
    #[must_use]
    pub fn position(&self, event: SimEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| *e == event)
    }

    /// Number of matching events.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&SimEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_lifecycle() {
        let world = SimWorld::new();
        let body = world.create_body(DVec3::new(1.0, 2.0, 3.0));
        assert!(world.has_body(body));
        assert!(world.set_body_position(body, DVec3::ZERO));
        assert_eq!(world.body_position(body), Some(DVec3::ZERO));
        assert!(world.remove_body(body));
        assert!(!world.has_body(body));
        assert!(!world.set_body_position(body, DVec3::ONE));
        assert!(world.is_empty());
    }

    #[test]
    fn test_event_order() {
        let log = EventLog::default();
        log.push(SimEvent::PagerReleased);
        log.push(SimEvent::TerrainReleased);
        assert_eq!(log.position(SimEvent::PagerReleased), Some(0));
        assert_eq!(log.position(SimEvent::TerrainReleased), Some(1));
        assert_eq!(log.count(|e| matches!(e, SimEvent::TileLoaded(_))), 0);
    }
}
