//! Per-viewer delta frame encoding.
//!
//! For every tracked entity the bit region carries one presence bit. A
//! present entity continues with a 2-bit code:
//!
//! | code | meaning | followed by |
//! |------|---------|-------------|
//! | 0 | flagged, did not move | nothing |
//! | 1 | walked | 3-bit direction, changed bit |
//! | 2 | ran | two 3-bit directions, changed bit |
//! | 3 | removed | nothing |
//!
//! An entity that teleported or left view distance is removed. Additions
//! happen afterwards in ascending slot order, so a teleported entity that
//! is still in view is re-added in the same frame with a fresh delta. A
//! delta is never written unless it fits the 5-bit field.

use tracing::trace;

use crate::config::UpdateConfig;
use crate::core::bits::BitWriter;
use crate::core::buffer::PacketWriter;
use crate::core::frame::{FrameBuilder, OutgoingFrame};
use crate::error::{ProtocolError, Result};
use crate::protocol::outgoing;

use super::entity::{Entity, EntityTable, Movement, Snapshot, Viewer};
use super::mask::{Attribute, EntityKind};
use super::Position;

pub const PLAYER_UPDATE: u8 = 81;
pub const NPC_UPDATE: u8 = 65;

const COUNT_BITS: u32 = 8;
const DELTA_BITS: u32 = 5;
const NPC_TYPE_BITS: u32 = 12;
const LOCAL_BITS: u32 = 7;

const CODE_STILL: u32 = 0;
const CODE_WALK: u32 = 1;
const CODE_RUN: u32 = 2;
/// Removal for tracked entities, placement for the viewer's own player.
const CODE_REMOVE: u32 = 3;

/// Largest view distance whose deltas fit the signed 5-bit field.
pub const MAX_VIEW_DISTANCE: i32 = 15;
/// Ceiling imposed by the 8-bit tracked count.
pub const MAX_TRACKED: usize = 255;

impl EntityKind {
    fn opcode(self) -> u8 {
        match self {
            EntityKind::Player => PLAYER_UPDATE,
            EntityKind::Npc => NPC_UPDATE,
        }
    }

    fn slot_bits(self) -> u32 {
        match self {
            EntityKind::Player => 11,
            EntityKind::Npc => 14,
        }
    }

    /// All-ones slot id that ends the bit region when attribute blocks follow.
    fn end_marker(self) -> u32 {
        (1 << self.slot_bits()) - 1
    }
}

/// Tuning limits for one viewer's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateLimits {
    pub additions_per_tick: usize,
    pub max_visible: usize,
    pub view_distance: i32,
}

impl UpdateLimits {
    /// Limits clamped to what the frame format can express.
    pub fn new(additions_per_tick: usize, max_visible: usize, view_distance: i32) -> Self {
        Self {
            additions_per_tick,
            max_visible: max_visible.min(MAX_TRACKED),
            view_distance: view_distance.clamp(0, MAX_VIEW_DISTANCE),
        }
    }
}

impl Default for UpdateLimits {
    fn default() -> Self {
        Self::new(15, MAX_TRACKED, MAX_VIEW_DISTANCE)
    }
}

impl From<&UpdateConfig> for UpdateLimits {
    fn from(config: &UpdateConfig) -> Self {
        Self::new(
            config.additions_per_tick,
            config.max_visible,
            config.view_distance,
        )
    }
}

/// Frames for one viewer for one tick, in send order.
#[derive(Debug, Clone)]
pub struct ViewerFrames {
    /// New map region, when the viewer moved too far from the last anchor
    pub region: Option<OutgoingFrame>,
    pub players: OutgoingFrame,
    pub npcs: OutgoingFrame,
}

impl ViewerFrames {
    pub fn into_frames(self) -> impl Iterator<Item = OutgoingFrame> {
        self.region
            .into_iter()
            .chain([self.players, self.npcs])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateEncoder {
    limits: UpdateLimits,
}

impl UpdateEncoder {
    pub fn new(limits: UpdateLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> UpdateLimits {
        self.limits
    }

    /// Build this tick's frames for `viewer` and update what it tracks.
    ///
    /// The viewer's anchor and tracked sets change only when both frames
    /// were built; on error the viewer is left untouched.
    ///
    /// # Errors
    /// `ConfigError` if the viewer's own player is not in the snapshot;
    /// codec errors if an entity carries a value its field cannot hold.
    pub fn encode(&self, viewer: &mut Viewer, snapshot: &Snapshot) -> Result<ViewerFrames> {
        let me = snapshot.players.get(viewer.slot).ok_or_else(|| {
            ProtocolError::ConfigError(format!("viewer slot {} has no player", viewer.slot))
        })?;

        let mut anchor = viewer.anchor;
        let region = if me.position.needs_region_change(&anchor) {
            anchor = me.position;
            Some(outgoing::map_region(
                me.position.region_x(),
                me.position.region_y(),
            )?)
        } else {
            None
        };
        // A new anchor invalidates the client's local coordinates.
        let own_movement = if region.is_some() {
            Movement::Teleport
        } else {
            me.movement
        };

        let (players, tracked_players) =
            self.encode_class(viewer, &anchor, me, Some(own_movement), &snapshot.players)?;
        let (npcs, tracked_npcs) = self.encode_class(viewer, &anchor, me, None, &snapshot.npcs)?;

        viewer.anchor = anchor;
        viewer.players = tracked_players;
        viewer.npcs = tracked_npcs;
        Ok(ViewerFrames {
            region,
            players,
            npcs,
        })
    }

    /// One class's frame and the slots the viewer tracks once it is sent.
    fn encode_class(
        &self,
        viewer: &Viewer,
        anchor: &Position,
        me: &Entity,
        own_movement: Option<Movement>,
        table: &EntityTable,
    ) -> Result<(OutgoingFrame, Vec<u16>)> {
        let kind = table.kind();
        let distance = self.limits.view_distance;
        let mut frame = FrameBuilder::var_short(kind.opcode());
        let mut blocks = PacketWriter::new();

        let previous = viewer.tracked(kind);
        let mut retained = Vec::with_capacity(previous.len() + self.limits.additions_per_tick);
        let mut bits = frame.bits();

        if let Some(movement) = own_movement {
            let flagged = me.attributes.mask().wire_bits(kind) != 0;
            write_own(&mut bits, me, movement, flagged, anchor)?;
            if flagged {
                me.attributes
                    .write_block(kind, me.attributes.mask(), me.appearance.as_ref(), &mut blocks)?;
            }
        }

        bits.write_bits(COUNT_BITS, previous.len() as u32)?;
        for &slot in previous {
            let visible = table
                .get(slot)
                .filter(|e| e.movement != Movement::Teleport && e.position.within(&me.position, distance));
            match visible {
                Some(entity) => {
                    let flagged = entity.attributes.mask().wire_bits(kind) != 0;
                    write_retained(&mut bits, entity.movement, flagged)?;
                    if flagged {
                        entity.attributes.write_block(
                            kind,
                            entity.attributes.mask(),
                            entity.appearance.as_ref(),
                            &mut blocks,
                        )?;
                    }
                    retained.push(slot);
                }
                None => {
                    bits.write_bit(true)?;
                    bits.write_bits(2, CODE_REMOVE)?;
                }
            }
        }

        let mut added = 0;
        for entity in table.iter() {
            if added >= self.limits.additions_per_tick || retained.len() >= self.limits.max_visible {
                break;
            }
            if (kind == EntityKind::Player && entity.slot == viewer.slot)
                || !entity.position.within(&me.position, distance)
                || retained.contains(&entity.slot)
            {
                continue;
            }

            // Players are introduced with their appearance.
            let mask = match kind {
                EntityKind::Player => entity.attributes.mask().with(Attribute::Appearance),
                EntityKind::Npc => entity.attributes.mask(),
            };
            let flagged = mask.wire_bits(kind) != 0;
            write_addition(&mut bits, entity, me, flagged)?;
            if flagged {
                entity
                    .attributes
                    .write_block(kind, mask, entity.appearance.as_ref(), &mut blocks)?;
            }
            retained.push(entity.slot);
            added += 1;
        }

        if !blocks.is_empty() {
            bits.write_bits(kind.slot_bits(), kind.end_marker())?;
        }
        let bit_len = bits.finish();
        trace!(?kind, tracked = retained.len(), added, bit_len, block_len = blocks.len(), "Encoded update");

        frame.put_bytes(blocks.as_bytes());
        Ok((frame.finish()?, retained))
    }
}

fn write_own(
    bits: &mut BitWriter<'_>,
    me: &Entity,
    movement: Movement,
    flagged: bool,
    anchor: &Position,
) -> Result<()> {
    match movement {
        Movement::Teleport => {
            let local_x = me.position.local_x(anchor);
            let local_y = me.position.local_y(anchor);
            let local = |v: i32| {
                u32::try_from(v).map_err(|_| ProtocolError::ValueOutOfRange {
                    value: v as i64,
                    bits: LOCAL_BITS,
                })
            };
            bits.write_bit(true)?;
            bits.write_bits(2, CODE_REMOVE)?;
            bits.write_bits(2, me.position.z as u32)?;
            bits.write_bit(true)?;
            bits.write_bit(flagged)?;
            bits.write_bits(LOCAL_BITS, local(local_y)?)?;
            bits.write_bits(LOCAL_BITS, local(local_x)?)
        }
        other => write_retained(bits, other, flagged),
    }
}

fn write_retained(bits: &mut BitWriter<'_>, movement: Movement, flagged: bool) -> Result<()> {
    match movement {
        Movement::None if !flagged => bits.write_bit(false),
        Movement::None => {
            bits.write_bit(true)?;
            bits.write_bits(2, CODE_STILL)
        }
        Movement::Walk(direction) => {
            bits.write_bit(true)?;
            bits.write_bits(2, CODE_WALK)?;
            bits.write_bits(3, direction.code())?;
            bits.write_bit(flagged)
        }
        Movement::Run(first, second) => {
            bits.write_bit(true)?;
            bits.write_bits(2, CODE_RUN)?;
            bits.write_bits(3, first.code())?;
            bits.write_bits(3, second.code())?;
            bits.write_bit(flagged)
        }
        Movement::Teleport => Err(ProtocolError::Custom(
            "teleported entity must be removed, not retained".into(),
        )),
    }
}

fn write_addition(bits: &mut BitWriter<'_>, entity: &Entity, me: &Entity, flagged: bool) -> Result<()> {
    let (dx, dy) = entity.position.delta(&me.position);
    bits.write_bits(entity.kind.slot_bits(), entity.slot as u32)?;
    match entity.kind {
        EntityKind::Player => {
            bits.write_bit(flagged)?;
            bits.write_bit(true)?;
            bits.write_signed(DELTA_BITS, dy)?;
            bits.write_signed(DELTA_BITS, dx)
        }
        EntityKind::Npc => {
            bits.write_signed(DELTA_BITS, dy)?;
            bits.write_signed(DELTA_BITS, dx)?;
            bits.write_bit(true)?;
            bits.write_bits(NPC_TYPE_BITS, entity.npc_type as u32)?;
            bits.write_bit(flagged)
        }
    }
}
