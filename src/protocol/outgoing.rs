//! Server-to-client frame builders.
//!
//! Each function produces one sealed [`OutgoingFrame`] in the exact layout
//! the client expects. Frames sent straight after login are bundled by
//! [`setup_burst`].

use serde::{Deserialize, Serialize};

use crate::core::buffer::{ByteOrder, Transform};
use crate::core::frame::{FrameBuilder, OutgoingFrame};
use crate::error::Result;

pub const MAP_REGION: u8 = 73;
pub const PLAYER_INIT: u8 = 249;
pub const SIDEBAR: u8 = 71;
pub const CONTEXT_OPTION: u8 = 104;
pub const ITEM_CONTAINER: u8 = 53;
pub const SKILL: u8 = 134;
pub const RUN_ENERGY: u8 = 110;
pub const GAME_MESSAGE: u8 = 253;
pub const CONFIG: u8 = 36;
pub const LOGOUT: u8 = 109;

/// Interface ids the setup burst fills.
pub const INVENTORY_INTERFACE: u16 = 3214;
pub const EQUIPMENT_INTERFACE: u16 = 1688;

/// Amounts above this are written as a marker byte plus a full word.
const SMALL_AMOUNT_LIMIT: u32 = 254;

/// Sidebar tabs and their interfaces, in tab order.
pub const DEFAULT_SIDEBARS: [(u8, u16); 14] = [
    (0, 2423),
    (1, 3917),
    (2, 638),
    (3, 3213),
    (4, 1644),
    (5, 5608),
    (6, 1151),
    (8, 5065),
    (9, 5715),
    (10, 2449),
    (11, 904),
    (12, 147),
    (13, 962),
    (7, 0xFFFF),
];

/// Item stack in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: u16,
    pub amount: u32,
}

impl Item {
    pub const fn new(id: u16, amount: u32) -> Self {
        Self { id, amount }
    }
}

/// Anchor the client viewport on a map region.
pub fn map_region(region_x: u16, region_y: u16) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::fixed(MAP_REGION, 4);
    frame.put_u16_with(region_x.wrapping_add(6), ByteOrder::Big, Transform::Add)?;
    frame.put_u16(region_y.wrapping_add(6));
    frame.finish()
}

/// Tell the client its own slot in the population.
pub fn player_init(member: bool, slot: u16) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::fixed(PLAYER_INIT, 3);
    frame.put_u8_t(member as u8, Transform::Add);
    frame.put_u16_with(slot, ByteOrder::Little, Transform::Add)?;
    frame.finish()
}

pub fn sidebar(tab: u8, interface: u16) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::fixed(SIDEBAR, 3);
    frame.put_u16(interface);
    frame.put_u8_t(tab, Transform::Add);
    frame.finish()
}

/// Right-click option shown on other players.
pub fn context_option(slot: u8, top: bool, label: &str) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::var_byte(CONTEXT_OPTION);
    frame.put_u8_t(slot, Transform::Negate);
    frame.put_u8_t(top as u8, Transform::Add);
    frame.put_string(label);
    frame.finish()
}

/// Replace the contents of an item container.
pub fn item_container(interface: u16, items: &[Item]) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::var_short(ITEM_CONTAINER);
    frame.put_u16(interface);
    frame.put_u16(items.len() as u16);
    for item in items {
        if item.amount > SMALL_AMOUNT_LIMIT {
            frame.put_u8(u8::MAX);
            frame.put_u32_with(item.amount, ByteOrder::InverseMiddle, Transform::None)?;
        } else {
            frame.put_u8(item.amount as u8);
        }
        // Empty slots are id 0 on the wire, so ids are shifted by one.
        frame.put_u16_with(item.id.wrapping_add(1), ByteOrder::Little, Transform::Add)?;
    }
    frame.finish()
}

pub fn skill(skill: u8, experience: u32, level: u8) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::fixed(SKILL, 6);
    frame.put_u8(skill);
    frame.put_u32_with(experience, ByteOrder::Middle, Transform::None)?;
    frame.put_u8(level);
    frame.finish()
}

pub fn run_energy(energy: u8) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::fixed(RUN_ENERGY, 1);
    frame.put_u8(energy);
    frame.finish()
}

pub fn game_message(message: &str) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::var_byte(GAME_MESSAGE);
    frame.put_string(message);
    frame.finish()
}

/// Set a client configuration variable.
pub fn config(id: u16, value: u8) -> Result<OutgoingFrame> {
    let mut frame = FrameBuilder::fixed(CONFIG, 3);
    frame.put_u16_with(id, ByteOrder::Little, Transform::None)?;
    frame.put_u8(value);
    frame.finish()
}

pub fn logout() -> Result<OutgoingFrame> {
    FrameBuilder::fixed(LOGOUT, 0).finish()
}

/// What the setup burst needs to know about the player logging in.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext<'a> {
    pub slot: u16,
    pub member: bool,
    pub region: (u16, u16),
    pub run_energy: u8,
    pub inventory: &'a [Item],
    pub equipment: &'a [Item],
    pub skills: &'a [(u32, u8)],
    /// Config variables of timed effects still running, with their values
    pub resumed_effects: &'a [(u16, u8)],
    pub welcome: &'a str,
}

/// Frames sent right after a successful login, in send order.
pub fn setup_burst(ctx: &SetupContext<'_>) -> Result<Vec<OutgoingFrame>> {
    let mut frames = Vec::with_capacity(8 + DEFAULT_SIDEBARS.len() + ctx.skills.len());
    frames.push(map_region(ctx.region.0, ctx.region.1)?);
    frames.push(player_init(ctx.member, ctx.slot)?);
    for (tab, interface) in DEFAULT_SIDEBARS {
        frames.push(sidebar(tab, interface)?);
    }
    frames.push(context_option(3, true, "Follow")?);
    frames.push(context_option(4, false, "Trade with")?);
    frames.push(item_container(INVENTORY_INTERFACE, ctx.inventory)?);
    frames.push(item_container(EQUIPMENT_INTERFACE, ctx.equipment)?);
    for (index, &(experience, level)) in ctx.skills.iter().enumerate() {
        frames.push(skill(index as u8, experience, level)?);
    }
    frames.push(run_energy(ctx.run_energy)?);
    for &(id, value) in ctx.resumed_effects {
        frames.push(config(id, value)?);
    }
    frames.push(game_message(ctx.welcome)?);
    Ok(frames)
}
