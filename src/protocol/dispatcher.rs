use once_cell::sync::OnceCell;

use crate::core::buffer::PacketReader;
use crate::core::frame::{inbound_size, FrameSize, InboundFrame};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::messages::{self, ClientEvent};

/// Payload decoder for one opcode.
pub type DecodeFn = fn(&mut PacketReader<'_>, u8) -> Result<ClientEvent>;

/// Static routing entry: opcode, the framing its decoder expects, and the decoder.
#[derive(Clone, Copy)]
pub struct Route {
    pub opcode: u8,
    pub name: &'static str,
    pub size: FrameSize,
    pub decode: DecodeFn,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("opcode", &self.opcode)
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

const fn route(opcode: u8, name: &'static str, size: FrameSize, decode: DecodeFn) -> Route {
    Route {
        opcode,
        name,
        size,
        decode,
    }
}

/// Every client message the server understands.
pub const ROUTES: &[Route] = &[
    route(0, "keep_alive", FrameSize::Fixed(0), messages::keep_alive),
    route(3, "focus", FrameSize::Fixed(1), messages::focus),
    route(4, "public_chat", FrameSize::VarByte, messages::public_chat),
    route(41, "equip_item", FrameSize::Fixed(6), messages::equip),
    route(86, "camera", FrameSize::Fixed(4), messages::camera),
    route(87, "drop_item", FrameSize::Fixed(6), messages::drop_item),
    route(98, "walk_on_command", FrameSize::VarByte, messages::walk),
    route(101, "appearance", FrameSize::Fixed(13), messages::appearance),
    route(103, "command", FrameSize::VarByte, messages::command),
    route(121, "region_loaded", FrameSize::Fixed(0), messages::region_loaded),
    route(126, "private_message", FrameSize::VarByte, messages::private_message),
    route(164, "walk", FrameSize::VarByte, messages::walk),
    route(185, "button", FrameSize::Fixed(2), messages::button),
    route(188, "add_friend", FrameSize::Fixed(8), messages::add_friend),
    route(202, "idle_logout", FrameSize::Fixed(0), messages::idle_logout),
    route(241, "mouse_click", FrameSize::Fixed(4), messages::mouse),
    route(248, "minimap_walk", FrameSize::VarByte, messages::walk),
];

static STANDARD: OnceCell<Dispatcher> = OnceCell::new();

/// Opcode-indexed dispatch table, validated once when built.
pub struct Dispatcher {
    routes: Box<[Option<Route>; 256]>,
    registered: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registered", &self.registered)
            .finish()
    }
}

impl Dispatcher {
    /// Table over [`ROUTES`].
    pub fn new() -> Result<Self> {
        Self::from_routes(ROUTES)
    }

    /// Process-wide table over [`ROUTES`], built on first use.
    pub fn standard() -> Result<&'static Self> {
        STANDARD.get_or_try_init(Self::new)
    }

    /// Build a table, rejecting duplicate opcodes and decoders whose
    /// expected framing disagrees with the inbound size table.
    pub fn from_routes(routes: &[Route]) -> Result<Self> {
        let mut table: Box<[Option<Route>; 256]> = Box::new([None; 256]);
        for route in routes {
            let slot = &mut table[route.opcode as usize];
            if slot.is_some() {
                return Err(ProtocolError::DuplicateOpcode(route.opcode));
            }
            if inbound_size(route.opcode) != route.size {
                return Err(ProtocolError::ConfigError(format!(
                    "{}: opcode {} ({})",
                    constants::ERR_HANDLER_WITHOUT_SIZE,
                    route.opcode,
                    route.name
                )));
            }
            *slot = Some(*route);
        }
        Ok(Self {
            routes: table,
            registered: routes.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.registered
    }

    pub fn is_empty(&self) -> bool {
        self.registered == 0
    }

    pub fn route(&self, opcode: u8) -> Option<&Route> {
        self.routes[opcode as usize].as_ref()
    }

    /// Decode a frame into its event.
    ///
    /// The frame has already been cut to its declared length, so a failed
    /// decode leaves the stream aligned on the next frame.
    ///
    /// # Errors
    /// - `UnknownOpcode` when no decoder is registered
    /// - `MalformedFrame` when the payload does not match its decoder
    pub fn dispatch(&self, frame: &InboundFrame) -> Result<ClientEvent> {
        let route = self
            .route(frame.opcode)
            .ok_or(ProtocolError::UnknownOpcode(frame.opcode))?;
        let mut reader = PacketReader::new(&frame.payload);
        (route.decode)(&mut reader, frame.opcode).map_err(|e| match e {
            ProtocolError::MalformedFrame { .. } => e,
            other => ProtocolError::MalformedFrame {
                opcode: frame.opcode,
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_standard_table_is_valid() {
        let dispatcher = Dispatcher::new().unwrap();
        assert_eq!(dispatcher.len(), ROUTES.len());
        assert_eq!(dispatcher.route(185).unwrap().name, "button");
        assert!(dispatcher.route(1).is_none());
        assert!(std::ptr::eq(
            Dispatcher::standard().unwrap(),
            Dispatcher::standard().unwrap()
        ));
    }

    #[test]
    fn test_duplicate_opcode_rejected() {
        let routes = [
            route(0, "a", FrameSize::Fixed(0), messages::keep_alive),
            route(0, "b", FrameSize::Fixed(0), messages::keep_alive),
        ];
        assert!(matches!(
            Dispatcher::from_routes(&routes),
            Err(ProtocolError::DuplicateOpcode(0))
        ));
    }

    #[test]
    fn test_framing_mismatch_rejected() {
        let routes = [route(185, "button", FrameSize::VarByte, messages::button)];
        assert!(matches!(
            Dispatcher::from_routes(&routes),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        let dispatcher = Dispatcher::new().unwrap();
        let frame = InboundFrame {
            opcode: 1,
            payload: Bytes::new(),
        };
        assert!(matches!(
            dispatcher.dispatch(&frame),
            Err(ProtocolError::UnknownOpcode(1))
        ));
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let dispatcher = Dispatcher::new().unwrap();
        let frame = InboundFrame {
            opcode: 126,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(matches!(
            dispatcher.dispatch(&frame),
            Err(ProtocolError::MalformedFrame { opcode: 126, .. })
        ));
    }
}
