//! Entity state read by the encoder.
//!
//! An [`EntityTable`] holds every entity of one class by slot, as left by
//! the world simulation at the end of a tick. A [`Viewer`] is the per-player
//! memory of which entities that player's client currently shows.

use std::collections::BTreeMap;

use crate::error::{ProtocolError, Result};

use super::mask::{Appearance, Attributes, EntityKind};
use super::{Direction, Position};

/// Highest player slot; 2047 itself marks the end of the bit region.
pub const MAX_PLAYER_SLOT: u16 = 2046;
/// Highest NPC slot; 16383 itself marks the end of the bit region.
pub const MAX_NPC_SLOT: u16 = 16382;
/// Largest NPC definition id the 12-bit type field holds.
pub const MAX_NPC_TYPE: u16 = 4095;
/// Highest plane the 2-bit height field holds.
pub const MAX_PLANE: u8 = 3;

/// How an entity moved during the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Movement {
    #[default]
    None,
    Walk(Direction),
    Run(Direction, Direction),
    /// Placed without walking; viewers drop and re-add the entity
    Teleport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub slot: u16,
    pub kind: EntityKind,
    pub position: Position,
    pub movement: Movement,
    /// NPC definition id; unused for players
    pub npc_type: u16,
    pub appearance: Option<Appearance>,
    pub attributes: Attributes,
}

impl Entity {
    pub fn player(slot: u16, position: Position, appearance: Appearance) -> Self {
        Self {
            slot,
            kind: EntityKind::Player,
            position,
            movement: Movement::None,
            npc_type: 0,
            appearance: Some(appearance),
            attributes: Attributes::default(),
        }
    }

    pub fn npc(slot: u16, npc_type: u16, position: Position) -> Self {
        Self {
            slot,
            kind: EntityKind::Npc,
            position,
            movement: Movement::None,
            npc_type,
            appearance: None,
            attributes: Attributes::default(),
        }
    }

    /// Whether this entity moved or flagged attributes this tick.
    pub fn has_update(&self) -> bool {
        self.movement != Movement::None || !self.attributes.is_empty()
    }

    /// Record one step, upgrading a walk to a run on the second step.
    pub fn step(&mut self, direction: Direction) {
        self.position = self.position.step(direction);
        self.movement = match self.movement {
            Movement::None => Movement::Walk(direction),
            Movement::Walk(first) => Movement::Run(first, direction),
            other => other,
        };
    }

    pub fn teleport(&mut self, position: Position) {
        self.position = position;
        self.movement = Movement::Teleport;
    }

    /// End-of-tick reset: masks cleared, movement forgotten.
    pub fn reset(&mut self) {
        self.movement = Movement::None;
        self.attributes.clear();
    }
}

/// All entities of one class, by slot.
#[derive(Debug, Clone)]
pub struct EntityTable {
    kind: EntityKind,
    entities: BTreeMap<u16, Entity>,
}

impl EntityTable {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entities: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    fn max_slot(&self) -> u16 {
        match self.kind {
            EntityKind::Player => MAX_PLAYER_SLOT,
            EntityKind::Npc => MAX_NPC_SLOT,
        }
    }

    /// Insert or replace the entity in `entity.slot`.
    ///
    /// # Errors
    /// `ConfigError` when the entity's class or slot does not fit this table,
    /// or its plane or NPC type does not fit the update frame.
    pub fn insert(&mut self, entity: Entity) -> Result<()> {
        if entity.kind != self.kind {
            return Err(ProtocolError::ConfigError(format!(
                "{:?} entity inserted into {:?} table",
                entity.kind, self.kind
            )));
        }
        let min_slot = match self.kind {
            EntityKind::Player => 1,
            EntityKind::Npc => 0,
        };
        if entity.slot < min_slot || entity.slot > self.max_slot() {
            return Err(ProtocolError::ConfigError(format!(
                "slot {} outside {min_slot}..={}",
                entity.slot,
                self.max_slot()
            )));
        }
        if entity.position.z > MAX_PLANE {
            return Err(ProtocolError::ConfigError(format!(
                "plane {} above {MAX_PLANE}",
                entity.position.z
            )));
        }
        if entity.kind == EntityKind::Npc && entity.npc_type > MAX_NPC_TYPE {
            return Err(ProtocolError::ConfigError(format!(
                "npc type {} above {MAX_NPC_TYPE}",
                entity.npc_type
            )));
        }
        self.entities.insert(entity.slot, entity);
        Ok(())
    }

    pub fn remove(&mut self, slot: u16) -> Option<Entity> {
        self.entities.remove(&slot)
    }

    pub fn get(&self, slot: u16) -> Option<&Entity> {
        self.entities.get(&slot)
    }

    pub fn get_mut(&mut self, slot: u16) -> Option<&mut Entity> {
        self.entities.get_mut(&slot)
    }

    /// Entities in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn reset_all(&mut self) {
        for entity in self.entities.values_mut() {
            entity.reset();
        }
    }
}

/// Both entity tables as of the end of a tick.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub players: EntityTable,
    pub npcs: EntityTable,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            players: EntityTable::new(EntityKind::Player),
            npcs: EntityTable::new(EntityKind::Npc),
        }
    }

    pub fn reset_all(&mut self) {
        self.players.reset_all();
        self.npcs.reset_all();
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// What one player's client currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    /// The viewing player's own slot
    pub slot: u16,
    /// Position the client's loaded map area was last anchored on
    pub anchor: Position,
    pub(crate) players: Vec<u16>,
    pub(crate) npcs: Vec<u16>,
}

impl Viewer {
    pub fn new(slot: u16, anchor: Position) -> Self {
        Self {
            slot,
            anchor,
            players: Vec::new(),
            npcs: Vec::new(),
        }
    }

    /// Tracked slots of `kind`, in the order the client lists them.
    pub fn tracked(&self, kind: EntityKind) -> &[u16] {
        match kind {
            EntityKind::Player => &self.players,
            EntityKind::Npc => &self.npcs,
        }
    }
}
