//! # Entity Delta Updates
//!
//! Per-viewer, per-tick frames describing what changed among the entities a
//! viewer can see.
//!
//! ## Frame Layout
//! ```text
//! [bit region: own movement?, tracked count, per tracked entity, additions, end marker?]
//! [byte region: attribute blocks of every flagged entity, in bit-region order]
//! ```
//! The bit region is closed before the first attribute block is written, so
//! the two regions never interleave.
//!
//! ## Components
//! - **Mask**: which attribute categories changed this tick, and their payloads
//! - **Entity**: per-slot entity state and the viewer's tracked set
//! - **Encoder**: builds the frames for one viewer
//! - **Tick**: encodes every viewer in parallel, then clears the masks

pub mod encoder;
pub mod entity;
pub mod mask;
pub mod tick;

use serde::{Deserialize, Serialize};

pub use encoder::{UpdateEncoder, UpdateLimits, ViewerFrames};
pub use entity::{Entity, EntityTable, Movement, Snapshot, Viewer};
pub use mask::{Animation, Appearance, Attribute, Attributes, EntityKind, Graphic, Hit, UpdateMask};
pub use tick::TickEncoder;

/// Tiles per map region edge.
const REGION_SIZE: u16 = 8;
/// The client loads a 13x13 region square around the anchor; this many
/// regions lie west/south of the anchor's own region.
const REGION_MARGIN: u16 = 6;
/// Local coordinates closer than this to the loaded area's edge force a new anchor.
const REGION_EDGE: u16 = 16;
/// Tiles covered by the loaded area along each axis.
const LOADED_AREA: u16 = 104;

/// A tile in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

impl Position {
    pub const fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Region coordinate the client anchors its loaded area on.
    pub fn region_x(&self) -> u16 {
        (self.x / REGION_SIZE).saturating_sub(REGION_MARGIN)
    }

    pub fn region_y(&self) -> u16 {
        (self.y / REGION_SIZE).saturating_sub(REGION_MARGIN)
    }

    /// X relative to the loaded area anchored at `anchor`.
    pub fn local_x(&self, anchor: &Position) -> i32 {
        self.x as i32 - (anchor.region_x() * REGION_SIZE) as i32
    }

    pub fn local_y(&self, anchor: &Position) -> i32 {
        self.y as i32 - (anchor.region_y() * REGION_SIZE) as i32
    }

    /// Whether the client needs a new map region to show this position.
    pub fn needs_region_change(&self, anchor: &Position) -> bool {
        let range = REGION_EDGE as i32..(LOADED_AREA - REGION_EDGE) as i32;
        !range.contains(&self.local_x(anchor)) || !range.contains(&self.local_y(anchor))
    }

    /// Offset from `origin` to `self`.
    pub fn delta(&self, origin: &Position) -> (i32, i32) {
        (
            self.x as i32 - origin.x as i32,
            self.y as i32 - origin.y as i32,
        )
    }

    /// Same plane and at most `distance` tiles away on both axes.
    pub fn within(&self, other: &Position, distance: i32) -> bool {
        let (dx, dy) = self.delta(other);
        self.z == other.z && dx.abs() <= distance && dy.abs() <= distance
    }

    /// One tile over in `direction`.
    pub fn step(&self, direction: Direction) -> Position {
        let (dx, dy) = direction.delta();
        Position {
            x: (self.x as i32 + dx) as u16,
            y: (self.y as i32 + dy) as u16,
            z: self.z,
        }
    }
}

/// The eight walking directions, numbered as the client expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    NorthWest = 0,
    North = 1,
    NorthEast = 2,
    West = 3,
    East = 4,
    SouthWest = 5,
    South = 6,
    SouthEast = 7,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
        Direction::West,
        Direction::East,
        Direction::SouthWest,
        Direction::South,
        Direction::SouthEast,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::NorthWest => (-1, 1),
            Direction::North => (0, 1),
            Direction::NorthEast => (1, 1),
            Direction::West => (-1, 0),
            Direction::East => (1, 0),
            Direction::SouthWest => (-1, -1),
            Direction::South => (0, -1),
            Direction::SouthEast => (1, -1),
        }
    }

    /// Direction of a single-tile step, `None` for a zero or longer step.
    pub fn from_delta(dx: i32, dy: i32) -> Option<Direction> {
        Self::ALL.into_iter().find(|d| d.delta() == (dx, dy))
    }
}
