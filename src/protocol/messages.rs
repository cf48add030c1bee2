//! Client-to-server messages.
//!
//! Each supported opcode has a decoder that turns a frame payload into a
//! [`ClientEvent`]. Decoders only read; they never see bytes outside the
//! payload window the frame layer cut for them.

use crate::core::buffer::{ByteOrder, PacketReader, Transform};
use crate::core::text;
use crate::error::{ProtocolError, Result};

/// Button id of the logout button on the sidebar.
pub const LOGOUT_BUTTON: u16 = 2458;

/// Trailing bytes the minimap walk frame carries for client-side checks.
pub const MINIMAP_WALK_TRAILER: usize = 14;

pub const MINIMAP_WALK_OPCODE: u8 = 248;

/// Decoded client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    KeepAlive,
    FocusChanged {
        focused: bool,
    },
    PublicChat {
        effects: u8,
        color: u8,
        text: String,
    },
    EquipItem {
        item: u16,
        slot: u16,
        interface: u16,
    },
    CameraMoved {
        pitch: u16,
        yaw: u16,
    },
    DropItem {
        item: u16,
        interface: u16,
        slot: u16,
    },
    AppearanceChanged {
        gender: u8,
        looks: [u8; 7],
        colors: [u8; 5],
    },
    Command(String),
    RegionLoaded,
    PrivateMessage {
        recipient: u64,
        text: String,
    },
    ButtonClicked(u16),
    AddFriend(u64),
    IdleLogout,
    MouseClicked(u32),
    Walk {
        /// Absolute tile of the first waypoint
        origin: (u16, u16),
        /// Further waypoints relative to `origin`
        steps: Vec<(i8, i8)>,
        running: bool,
    },
}

impl ClientEvent {
    /// Whether the event asks for the session to end.
    pub fn requests_logout(&self) -> bool {
        matches!(self, ClientEvent::ButtonClicked(LOGOUT_BUTTON))
    }
}

pub(crate) fn keep_alive(_: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::KeepAlive)
}

pub(crate) fn focus(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::FocusChanged {
        focused: reader.get_u8()? == 1,
    })
}

pub(crate) fn public_chat(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    let effects = reader.get_u8_t(Transform::Subtract)?;
    let color = reader.get_u8_t(Transform::Subtract)?;
    let packed = reader.get_bytes_reversed(reader.remaining(), Transform::Add)?;
    Ok(ClientEvent::PublicChat {
        effects,
        color,
        text: text::unpack_text(&packed),
    })
}

pub(crate) fn equip(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::EquipItem {
        item: reader.get_u16()?,
        slot: reader.get_u16_with(ByteOrder::Big, Transform::Add)?,
        interface: reader.get_u16_with(ByteOrder::Big, Transform::Add)?,
    })
}

pub(crate) fn camera(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::CameraMoved {
        pitch: reader.get_u16()?,
        yaw: reader.get_u16_with(ByteOrder::Big, Transform::Add)?,
    })
}

pub(crate) fn drop_item(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::DropItem {
        item: reader.get_u16_with(ByteOrder::Big, Transform::Add)?,
        interface: reader.get_u16()?,
        slot: reader.get_u16_with(ByteOrder::Big, Transform::Add)?,
    })
}

pub(crate) fn appearance(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    let gender = reader.get_u8()?;
    let mut looks = [0u8; 7];
    looks.copy_from_slice(reader.get_bytes(7)?);
    let mut colors = [0u8; 5];
    colors.copy_from_slice(reader.get_bytes(5)?);
    Ok(ClientEvent::AppearanceChanged {
        gender,
        looks,
        colors,
    })
}

pub(crate) fn command(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::Command(reader.get_string()?))
}

pub(crate) fn region_loaded(_: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::RegionLoaded)
}

pub(crate) fn private_message(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    let recipient = reader.get_u64()?;
    Ok(ClientEvent::PrivateMessage {
        recipient,
        text: text::unpack_text(reader.rest()),
    })
}

pub(crate) fn button(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::ButtonClicked(reader.get_u16()?))
}

pub(crate) fn add_friend(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::AddFriend(reader.get_u64()?))
}

pub(crate) fn idle_logout(_: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::IdleLogout)
}

pub(crate) fn mouse(reader: &mut PacketReader<'_>, _: u8) -> Result<ClientEvent> {
    Ok(ClientEvent::MouseClicked(reader.get_u32()?))
}

/// Shared by the three walk opcodes.
pub(crate) fn walk(reader: &mut PacketReader<'_>, opcode: u8) -> Result<ClientEvent> {
    let mut len = reader.remaining();
    if opcode == MINIMAP_WALK_OPCODE {
        len = len.checked_sub(MINIMAP_WALK_TRAILER).ok_or(ProtocolError::Underflow {
            needed: MINIMAP_WALK_TRAILER,
            remaining: len,
        })?;
    }
    // first x (2) + first y (2) + running (1)
    let step_bytes = len.checked_sub(5).ok_or(ProtocolError::Underflow {
        needed: 5,
        remaining: len,
    })?;
    if step_bytes % 2 != 0 {
        return Err(ProtocolError::MalformedFrame {
            opcode,
            reason: format!("walk path of {step_bytes} bytes is not a list of pairs"),
        });
    }

    let first_x = reader.get_u16_with(ByteOrder::Little, Transform::Add)?;
    let steps = (0..step_bytes / 2)
        .map(|_| {
            let dx = reader.get_i8_t(Transform::None)?;
            let dy = reader.get_i8_t(Transform::None)?;
            Ok((dx, dy))
        })
        .collect::<Result<Vec<_>>>()?;
    let first_y = reader.get_u16_with(ByteOrder::Little, Transform::None)?;
    let running = reader.get_u8_t(Transform::Negate)? == 1;

    Ok(ClientEvent::Walk {
        origin: (first_x, first_y),
        steps,
        running,
    })
}
