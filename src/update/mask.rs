//! Attribute masks and their payloads.
//!
//! World simulation flags what changed on an entity during a tick by setting
//! attributes; the encoder turns the flags into the wire mask of the
//! entity's class and writes each payload in that class's declared order.

use crate::core::buffer::{ByteOrder, PacketWriter, Transform};
use crate::error::Result;

use super::Position;

/// Attribute categories an entity can flag in a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Animation,
    Graphic,
    ForcedChat,
    FaceEntity,
    FaceCoordinate,
    PrimaryHit,
    SecondaryHit,
    /// Players only
    Appearance,
}

impl Attribute {
    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// The two entity classes, which frame their updates differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Npc,
}

/// Write order and wire bit of each attribute, per class.
const PLAYER_LAYOUT: [(Attribute, u16); 8] = [
    (Attribute::Graphic, 0x100),
    (Attribute::Animation, 0x8),
    (Attribute::ForcedChat, 0x4),
    (Attribute::FaceEntity, 0x1),
    (Attribute::Appearance, 0x10),
    (Attribute::FaceCoordinate, 0x2),
    (Attribute::PrimaryHit, 0x20),
    (Attribute::SecondaryHit, 0x200),
];

const NPC_LAYOUT: [(Attribute, u16); 7] = [
    (Attribute::Animation, 0x10),
    (Attribute::PrimaryHit, 0x8),
    (Attribute::Graphic, 0x80),
    (Attribute::FaceEntity, 0x20),
    (Attribute::ForcedChat, 0x1),
    (Attribute::SecondaryHit, 0x40),
    (Attribute::FaceCoordinate, 0x4),
];

/// Set on a player mask that continues into a second byte.
const EXTENDED_MASK: u16 = 0x40;

impl EntityKind {
    pub fn layout(self) -> &'static [(Attribute, u16)] {
        match self {
            EntityKind::Player => &PLAYER_LAYOUT,
            EntityKind::Npc => &NPC_LAYOUT,
        }
    }

    pub fn supports(self, attribute: Attribute) -> bool {
        self.layout().iter().any(|&(a, _)| a == attribute)
    }
}

/// Set of changed attribute categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UpdateMask(u8);

impl UpdateMask {
    pub const EMPTY: UpdateMask = UpdateMask(0);

    pub fn set(&mut self, attribute: Attribute) {
        self.0 |= attribute.bit();
    }

    pub fn with(mut self, attribute: Attribute) -> Self {
        self.set(attribute);
        self
    }

    pub fn contains(self, attribute: Attribute) -> bool {
        self.0 & attribute.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// The mask as the client of `kind` reads it. Attributes the class does
    /// not carry are left out.
    pub fn wire_bits(self, kind: EntityKind) -> u16 {
        let bits = kind
            .layout()
            .iter()
            .filter(|&&(a, _)| self.contains(a))
            .fold(0, |acc, &(_, bit)| acc | bit);
        if bits > 0xFF {
            bits | EXTENDED_MASK
        } else {
            bits
        }
    }

    /// Write the mask in one byte, or two little-endian bytes when extended.
    pub fn write(self, kind: EntityKind, out: &mut PacketWriter) -> Result<()> {
        let bits = self.wire_bits(kind);
        if bits > 0xFF {
            out.put_u16_with(bits, ByteOrder::Little, Transform::None)
        } else {
            out.put_u8(bits as u8);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Animation {
    pub id: u16,
    pub delay: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Graphic {
    pub id: u16,
    pub height: u16,
    pub delay: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hit {
    pub damage: u8,
    /// 0 block, 1 damage, 2 poison, 3 disease
    pub kind: u8,
    pub current: u8,
    pub maximum: u8,
}

/// What a player looks like. Sent whenever a player is first shown to a
/// viewer and when the player flags [`Attribute::Appearance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appearance {
    pub gender: u8,
    pub head_icon: u8,
    /// Worn item per equipment slot, 0 when empty
    pub equipment: [u16; 12],
    pub looks: [u8; 7],
    pub colors: [u8; 5],
    pub name: u64,
    pub combat_level: u8,
}

/// Body look shown in each equipment slot when nothing is worn there.
const LOOK_FOR_SLOT: [Option<usize>; 12] = [
    None,
    None,
    None,
    None,
    Some(2),
    None,
    Some(3),
    Some(5),
    Some(0),
    Some(4),
    Some(6),
    Some(1),
];

const ITEM_OFFSET: u16 = 0x200;
const LOOK_OFFSET: u16 = 0x100;

/// Stand, turn, walk, turn-around, turn right, turn left and run animations.
const DEFAULT_STANCE: [u16; 7] = [808, 823, 819, 820, 821, 822, 824];

impl Appearance {
    pub fn new(name: u64) -> Self {
        Self {
            gender: 0,
            head_icon: 0,
            equipment: [0; 12],
            looks: [0, 10, 18, 26, 33, 36, 42],
            colors: [0; 5],
            name,
            combat_level: 3,
        }
    }

    fn write(&self, out: &mut PacketWriter) -> Result<()> {
        let mut block = PacketWriter::with_capacity(64);
        block.put_u8(self.gender);
        block.put_u8(self.head_icon);
        for (slot, &item) in self.equipment.iter().enumerate() {
            if item != 0 {
                block.put_u16(ITEM_OFFSET.wrapping_add(item));
            } else if let Some(look) = LOOK_FOR_SLOT[slot] {
                block.put_u16(LOOK_OFFSET + self.looks[look] as u16);
            } else {
                block.put_u8(0);
            }
        }
        for color in self.colors {
            block.put_u8(color);
        }
        for animation in DEFAULT_STANCE {
            block.put_u16(animation);
        }
        block.put_u64(self.name);
        block.put_u8(self.combat_level);
        block.put_u16(0);

        out.put_u8_t(block.len() as u8, Transform::Negate);
        out.put_bytes(block.as_bytes());
        Ok(())
    }
}

/// One tick's flagged attributes and their payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    mask: UpdateMask,
    animation: Option<Animation>,
    graphic: Option<Graphic>,
    forced_chat: Option<String>,
    face_entity: Option<u16>,
    face_coordinate: Option<Position>,
    primary_hit: Option<Hit>,
    secondary_hit: Option<Hit>,
}

impl Attributes {
    pub fn mask(&self) -> UpdateMask {
        self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn set_animation(&mut self, animation: Animation) {
        self.animation = Some(animation);
        self.mask.set(Attribute::Animation);
    }

    pub fn set_graphic(&mut self, graphic: Graphic) {
        self.graphic = Some(graphic);
        self.mask.set(Attribute::Graphic);
    }

    pub fn set_forced_chat(&mut self, text: impl Into<String>) {
        self.forced_chat = Some(text.into());
        self.mask.set(Attribute::ForcedChat);
    }

    /// Face another entity. Players are addressed as `slot + 32768`.
    pub fn set_face_entity(&mut self, target: u16) {
        self.face_entity = Some(target);
        self.mask.set(Attribute::FaceEntity);
    }

    pub fn set_face_coordinate(&mut self, target: Position) {
        self.face_coordinate = Some(target);
        self.mask.set(Attribute::FaceCoordinate);
    }

    /// Record a hit. The first hit of a tick is primary, the second secondary;
    /// later hits replace the secondary one.
    pub fn push_hit(&mut self, hit: Hit) {
        if self.primary_hit.is_none() {
            self.primary_hit = Some(hit);
            self.mask.set(Attribute::PrimaryHit);
        } else {
            self.secondary_hit = Some(hit);
            self.mask.set(Attribute::SecondaryHit);
        }
    }

    pub fn mark_appearance(&mut self) {
        self.mask.set(Attribute::Appearance);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Write the attribute block for `mask`, which may add attributes the
    /// entity did not flag itself (appearance on first sight).
    pub(crate) fn write_block(
        &self,
        kind: EntityKind,
        mask: UpdateMask,
        appearance: Option<&Appearance>,
        out: &mut PacketWriter,
    ) -> Result<()> {
        mask.write(kind, out)?;
        for &(attribute, _) in kind.layout() {
            if !mask.contains(attribute) {
                continue;
            }
            match (kind, attribute) {
                (_, Attribute::Animation) => {
                    let a = self.animation.unwrap_or_default();
                    out.put_u16_with(a.id, ByteOrder::Little, Transform::None)?;
                    match kind {
                        EntityKind::Player => out.put_u8_t(a.delay, Transform::Negate),
                        EntityKind::Npc => out.put_u8(a.delay),
                    }
                }
                (EntityKind::Player, Attribute::Graphic) => {
                    let g = self.graphic.unwrap_or_default();
                    out.put_u16_with(g.id, ByteOrder::Little, Transform::None)?;
                    out.put_u32(((g.height as u32) << 16) | g.delay as u32);
                }
                (EntityKind::Npc, Attribute::Graphic) => {
                    let g = self.graphic.unwrap_or_default();
                    out.put_u16(g.id);
                    out.put_u32(((g.height as u32) << 16) | g.delay as u32);
                }
                (_, Attribute::ForcedChat) => {
                    out.put_string(self.forced_chat.as_deref().unwrap_or_default());
                }
                (EntityKind::Player, Attribute::FaceEntity) => {
                    let target = self.face_entity.unwrap_or(0xFFFF);
                    out.put_u16_with(target, ByteOrder::Little, Transform::None)?;
                }
                (EntityKind::Npc, Attribute::FaceEntity) => {
                    out.put_u16(self.face_entity.unwrap_or(0xFFFF));
                }
                (_, Attribute::FaceCoordinate) => {
                    let target = self.face_coordinate.unwrap_or_default();
                    let transform = match kind {
                        EntityKind::Player => Transform::Add,
                        EntityKind::Npc => Transform::None,
                    };
                    out.put_u16_with(target.x.wrapping_mul(2) + 1, ByteOrder::Little, transform)?;
                    out.put_u16_with(target.y.wrapping_mul(2) + 1, ByteOrder::Little, Transform::None)?;
                }
                (EntityKind::Player, Attribute::PrimaryHit) => {
                    let h = self.primary_hit.unwrap_or_default();
                    out.put_u8(h.damage);
                    out.put_u8_t(h.kind, Transform::Add);
                    out.put_u8_t(h.current, Transform::Negate);
                    out.put_u8(h.maximum);
                }
                (EntityKind::Npc, Attribute::PrimaryHit) => {
                    let h = self.primary_hit.unwrap_or_default();
                    out.put_u8_t(h.damage, Transform::Add);
                    out.put_u8_t(h.kind, Transform::Negate);
                    out.put_u8_t(h.current, Transform::Add);
                    out.put_u8(h.maximum);
                }
                (EntityKind::Player, Attribute::SecondaryHit) => {
                    let h = self.secondary_hit.unwrap_or_default();
                    out.put_u8(h.damage);
                    out.put_u8_t(h.kind, Transform::Subtract);
                    out.put_u8(h.current);
                    out.put_u8_t(h.maximum, Transform::Negate);
                }
                (EntityKind::Npc, Attribute::SecondaryHit) => {
                    let h = self.secondary_hit.unwrap_or_default();
                    out.put_u8_t(h.damage, Transform::Negate);
                    out.put_u8_t(h.kind, Transform::Subtract);
                    out.put_u8_t(h.current, Transform::Negate);
                    out.put_u8(h.maximum);
                }
                (EntityKind::Player, Attribute::Appearance) => match appearance {
                    Some(appearance) => appearance.write(out)?,
                    None => Appearance::new(0).write(out)?,
                },
                (EntityKind::Npc, Attribute::Appearance) => {}
            }
        }
        Ok(())
    }
}
