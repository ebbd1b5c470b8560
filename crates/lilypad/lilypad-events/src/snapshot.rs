#![forbid(unsafe_code)]

// World state broadcast by the server. Plain old data with a fixed layout:
// the same bytes are read by every attached process, so no pointers, no
// heap, and an all-zero bit pattern must be a valid value (the region is
// zero-filled on creation).

/// Upper bound on entities carried by one snapshot: 8 playable lanes of 20
/// cells each.
pub const MAX_ENTITIES: usize = 160;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GameState {
    #[default]
    Ready = 0,
    Running = 1,
    Player1Wins = 2,
    Player2Wins = 3,
    Draw = 4,
    Loss = 5,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EntityKind {
    #[default]
    Obstacle = 0,
    Car = 1,
    Frog = 2,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Facing {
    #[default]
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Entity {
    pub kind: EntityKind,
    pub facing: Facing,
    pub x: i32,
    pub y: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub state: GameState,
    pub time: i32,
    pub level: i32,
    pub width: i32,
    pub height: i32,
    /// Number of valid entries at the front of `entities`.
    pub num_entities: u32,
    pub entities: [Entity; MAX_ENTITIES],
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: GameState::Ready,
            time: 0,
            level: 0,
            width: 0,
            height: 0,
            num_entities: 0,
            entities: [Entity::default(); MAX_ENTITIES],
        }
    }
}

impl Snapshot {
    /// The valid entities. A corrupt count is clamped rather than trusted.
    pub fn entities(&self) -> &[Entity] {
        let n = (self.num_entities as usize).min(MAX_ENTITIES);
        &self.entities[..n]
    }

    /// Appends an entity; returns `false` when the snapshot is full.
    pub fn push_entity(&mut self, entity: Entity) -> bool {
        let n = self.num_entities as usize;
        if n >= MAX_ENTITIES {
            return false;
        }
        self.entities[n] = entity;
        self.num_entities += 1;
        true
    }

    pub fn clear_entities(&mut self) {
        self.num_entities = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    /// The snapshot is copied byte for byte across processes; any layout
    /// change must be deliberate (and bump the region version).
    #[test]
    fn snapshot_layout_is_stable() {
        assert_eq!(size_of::<Entity>(), 16);
        assert_eq!(size_of::<Snapshot>(), 24 + 16 * MAX_ENTITIES);
        assert_eq!(align_of::<Snapshot>(), 4);
    }

    #[test]
    fn push_stops_at_capacity() {
        let mut snap = Snapshot::default();
        for i in 0..MAX_ENTITIES {
            assert!(snap.push_entity(Entity {
                kind: EntityKind::Car,
                facing: Facing::Left,
                x: i as i32,
                y: 1,
            }));
        }
        assert!(!snap.push_entity(Entity::default()));
        assert_eq!(snap.entities().len(), MAX_ENTITIES);
        assert_eq!(snap.entities()[42].x, 42);

        snap.clear_entities();
        assert!(snap.entities().is_empty());
    }

    #[test]
    fn corrupt_count_is_clamped() {
        let snap = Snapshot {
            num_entities: u32::MAX,
            ..Snapshot::default()
        };
        assert_eq!(snap.entities().len(), MAX_ENTITIES);
    }
}
