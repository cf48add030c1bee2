//! # Frame Layer
//!
//! Opcode framing for the active stage of a session.
//!
//! Outbound frames are assembled with a [`FrameBuilder`], which reserves the
//! length header up front and back-patches it on [`FrameBuilder::finish`].
//! The opcode is stored unmasked; the session adds the keystream word at the
//! moment the frame is written to the socket, which keeps the cipher in step
//! with the order frames actually leave.
//!
//! Inbound frames are cut by a [`FrameReader`], which unmasks each opcode
//! exactly once and then waits, without consuming anything, until the whole
//! declared payload has arrived.

use std::ops::{Deref, DerefMut};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::buffer::PacketWriter;
use crate::error::{ProtocolError, Result};
use crate::protocol::cipher::IsaacCipher;

/// How a frame's payload length is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSize {
    /// Payload length is implied by the opcode
    Fixed(u16),
    /// One-byte length prefix
    VarByte,
    /// Two-byte big-endian length prefix
    VarShort,
    /// Payload runs to the end of the available data
    Unbounded,
}

impl FrameSize {
    /// Bytes occupied by opcode plus length prefix.
    pub const fn header_len(self) -> usize {
        match self {
            FrameSize::Fixed(_) | FrameSize::Unbounded => 1,
            FrameSize::VarByte => 2,
            FrameSize::VarShort => 3,
        }
    }

    const fn from_table(entry: i8) -> Self {
        match entry {
            VAR_BYTE => FrameSize::VarByte,
            VAR_SHORT => FrameSize::VarShort,
            n if n < 0 => FrameSize::Unbounded,
            n => FrameSize::Fixed(n as u16),
        }
    }
}

const VAR_BYTE: i8 = -1;
const VAR_SHORT: i8 = -2;

/// Payload sizes of client frames, indexed by opcode.
#[rustfmt::skip]
const INBOUND_SIZES: [i8; 256] = [
    0, 0, 0, 1, -1, 0, 0, 0, 0, 0,      // 0
    0, 0, 0, 0, 8, 0, 6, 2, 2, 0,       // 10
    0, 2, 0, 6, 0, 12, 0, 0, 0, 0,      // 20
    0, 0, 0, 0, 0, 8, 4, 0, 0, 2,       // 30
    2, 6, 0, 6, 0, -1, 0, 0, 0, 0,      // 40
    0, 0, 0, 12, 0, 0, 0, 8, 8, 12,     // 50
    8, 8, 0, 0, 0, 0, 0, 0, 0, 0,       // 60
    6, 0, 2, 2, 8, 6, 0, -1, 0, 6,      // 70
    0, 0, 0, 0, 0, 1, 4, 6, 0, 0,       // 80
    0, 0, 0, 0, 0, 3, 0, 0, -1, 0,      // 90
    0, 13, 0, -1, 0, 0, 0, 0, 0, 0,     // 100
    0, 0, 0, 0, 0, 0, 0, 6, 0, 0,       // 110
    1, 0, 6, 0, 0, 0, -1, 0, 2, 6,      // 120
    0, 4, 6, 8, 0, 6, 0, 0, 0, 2,       // 130
    0, 0, 0, 0, 0, 6, 0, 0, 0, 0,       // 140
    0, 0, 1, 2, 0, 2, 6, 0, 0, 0,       // 150
    0, 0, 0, 0, -1, -1, 0, 0, 0, 0,     // 160
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,       // 170
    0, 8, 0, 3, 0, 2, 0, 0, 8, 1,       // 180
    0, 0, 12, 0, 0, 0, 0, 0, 0, 0,      // 190
    2, 0, 0, 0, 0, 0, 0, 0, 0, 0,       // 200
    4, 0, 4, 0, 7, 8, 0, 0, 10, 0,      // 210
    0, 0, 0, 0, 0, 0, -1, 0, 6, 0,      // 220
    1, 0, 0, 0, 6, 0, 6, 8, 1, 0,       // 230
    0, 4, 0, 0, 0, 0, -1, 0, -1, 4,     // 240
    0, 0, 6, 6, 0, 0,                   // 250
];

/// Framing of a client frame with the given opcode.
pub fn inbound_size(opcode: u8) -> FrameSize {
    FrameSize::from_table(INBOUND_SIZES[opcode as usize])
}

/// A complete frame received from a client, opcode already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub opcode: u8,
    pub payload: Bytes,
}

/// A complete server frame: plain opcode, length header, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    size: FrameSize,
    bytes: Bytes,
}

impl OutgoingFrame {
    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.size.header_len()..]
    }

    /// Wire bytes with the opcode left unmasked.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append the frame to `dst`, masking the opcode with `key` when a cipher is in use.
    pub fn encode_into(&self, dst: &mut BytesMut, key: Option<u32>) {
        let opcode = match key {
            Some(key) => self.opcode().wrapping_add(key as u8),
            None => self.opcode(),
        };
        dst.reserve(self.bytes.len());
        dst.put_u8(opcode);
        dst.extend_from_slice(&self.bytes[1..]);
    }
}

/// Single-pass builder for an [`OutgoingFrame`].
///
/// Dereferences to [`PacketWriter`], so every byte-mode write and
/// [`PacketWriter::bits`] are available directly on the builder.
#[derive(Debug)]
pub struct FrameBuilder {
    size: FrameSize,
    writer: PacketWriter,
}

impl FrameBuilder {
    pub fn new(opcode: u8, size: FrameSize) -> Self {
        let mut writer = PacketWriter::with_capacity(16);
        writer.put_u8(opcode);
        match size {
            FrameSize::VarByte => writer.put_u8(0),
            FrameSize::VarShort => writer.put_u16(0),
            FrameSize::Fixed(_) | FrameSize::Unbounded => {}
        }
        Self { size, writer }
    }

    pub fn fixed(opcode: u8, len: u16) -> Self {
        Self::new(opcode, FrameSize::Fixed(len))
    }

    pub fn var_byte(opcode: u8) -> Self {
        Self::new(opcode, FrameSize::VarByte)
    }

    pub fn var_short(opcode: u8) -> Self {
        Self::new(opcode, FrameSize::VarShort)
    }

    /// Payload bytes written so far.
    pub fn payload_len(&self) -> usize {
        self.writer.len() - self.size.header_len()
    }

    /// Back-patch the length header and seal the frame.
    ///
    /// # Errors
    /// - `FrameTooLarge` when the payload exceeds what the length header can express
    /// - `MalformedFrame` when a fixed-size frame has the wrong payload length
    pub fn finish(mut self) -> Result<OutgoingFrame> {
        let len = self.payload_len();
        match self.size {
            FrameSize::Fixed(expected) if len != expected as usize => {
                return Err(ProtocolError::MalformedFrame {
                    opcode: self.writer.as_bytes()[0],
                    reason: format!("fixed frame expects {expected} bytes, built {len}"),
                });
            }
            FrameSize::VarByte => {
                let patched = u8::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
                    size: len,
                    max: u8::MAX as usize,
                })?;
                self.writer.buffer_mut()[1] = patched;
            }
            FrameSize::VarShort => {
                let patched = u16::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
                    size: len,
                    max: u16::MAX as usize,
                })?;
                self.writer.buffer_mut()[1..3].copy_from_slice(&patched.to_be_bytes());
            }
            _ => {}
        }
        Ok(OutgoingFrame {
            size: self.size,
            bytes: self.writer.freeze(),
        })
    }
}

impl Deref for FrameBuilder {
    type Target = PacketWriter;

    fn deref(&self) -> &Self::Target {
        &self.writer
    }
}

impl DerefMut for FrameBuilder {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.writer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingHeader {
    opcode: u8,
    size: FrameSize,
}

/// Resumable frame cutter for a byte stream.
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: Option<PendingHeader>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opcode whose payload is still being awaited, if any.
    pub fn pending_opcode(&self) -> Option<u8> {
        self.pending.map(|p| p.opcode)
    }

    /// Cut the next frame from `src`.
    ///
    /// The opcode byte is consumed (and the cipher drawn) exactly once per
    /// frame, even when the payload needs several reads to arrive.
    pub fn decode<F>(
        &mut self,
        src: &mut BytesMut,
        cipher: Option<&mut IsaacCipher>,
        sizes: F,
    ) -> Result<Option<InboundFrame>>
    where
        F: Fn(u8) -> FrameSize,
    {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if src.is_empty() {
                    return Ok(None);
                }
                let raw = src.get_u8();
                let opcode = match cipher {
                    Some(cipher) => raw.wrapping_sub(cipher.next_key() as u8),
                    None => raw,
                };
                let header = PendingHeader {
                    opcode,
                    size: sizes(opcode),
                };
                self.pending = Some(header);
                header
            }
        };

        let (prefix, len) = match header.size {
            FrameSize::Fixed(n) => (0, n as usize),
            FrameSize::VarByte => match src.first() {
                Some(&len) => (1, len as usize),
                None => return Ok(None),
            },
            FrameSize::VarShort => {
                if src.len() < 2 {
                    return Ok(None);
                }
                (2, u16::from_be_bytes([src[0], src[1]]) as usize)
            }
            FrameSize::Unbounded => (0, src.len()),
        };

        if src.len() < prefix + len {
            src.reserve(prefix + len - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let payload = src.split_to(len).freeze();
        self.pending = None;
        Ok(Some(InboundFrame {
            opcode: header.opcode,
            payload,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_table_covers_handled_opcodes() {
        assert_eq!(INBOUND_SIZES.len(), 256);
        assert_eq!(inbound_size(0), FrameSize::Fixed(0));
        assert_eq!(inbound_size(4), FrameSize::VarByte);
        assert_eq!(inbound_size(41), FrameSize::Fixed(6));
        assert_eq!(inbound_size(101), FrameSize::Fixed(13));
        assert_eq!(inbound_size(185), FrameSize::Fixed(2));
        assert_eq!(inbound_size(241), FrameSize::Fixed(4));
        assert_eq!(inbound_size(248), FrameSize::VarByte);
    }

    #[test]
    fn test_var_byte_back_patch() {
        let mut builder = FrameBuilder::var_byte(253);
        builder.put_string("hi");
        let frame = builder.finish().unwrap();
        assert_eq!(frame.as_bytes(), &[253, 3, b'h', b'i', 10]);
        assert_eq!(frame.payload(), &[b'h', b'i', 10]);
    }

    #[test]
    fn test_var_short_back_patch() {
        let mut builder = FrameBuilder::var_short(53);
        builder.put_bytes(&[0u8; 300]);
        let frame = builder.finish().unwrap();
        assert_eq!(&frame.as_bytes()[..3], &[53, 0x01, 0x2C]);
    }

    #[test]
    fn test_var_byte_overflow() {
        let mut builder = FrameBuilder::var_byte(253);
        builder.put_bytes(&[0u8; 256]);
        assert!(matches!(
            builder.finish(),
            Err(ProtocolError::FrameTooLarge { size: 256, max: 255 })
        ));
    }

    #[test]
    fn test_fixed_length_is_checked() {
        let mut builder = FrameBuilder::fixed(110, 1);
        builder.put_u16(5);
        assert!(matches!(
            builder.finish(),
            Err(ProtocolError::MalformedFrame { opcode: 110, .. })
        ));
    }

    #[test]
    fn test_reader_waits_for_whole_payload() {
        let mut reader = FrameReader::new();
        let mut src = BytesMut::from(&[41u8, 0, 1][..]);

        assert!(reader.decode(&mut src, None, inbound_size).unwrap().is_none());
        assert_eq!(reader.pending_opcode(), Some(41));
        assert_eq!(src.len(), 2);

        src.extend_from_slice(&[2, 3, 4, 5, 99]);
        let frame = reader.decode(&mut src, None, inbound_size).unwrap().unwrap();
        assert_eq!(frame.opcode, 41);
        assert_eq!(&frame.payload[..], &[0, 1, 2, 3, 4, 5]);
        assert_eq!(&src[..], &[99]);
        assert_eq!(reader.pending_opcode(), None);
    }

    #[test]
    fn test_reader_draws_cipher_once_per_frame() {
        let mut masking = IsaacCipher::new(&[1, 2, 3, 4]);
        let mut unmasking = IsaacCipher::new(&[1, 2, 3, 4]);

        let mut builder = FrameBuilder::var_byte(4);
        builder.put_bytes(&[9, 9, 9]);
        let frame = builder.finish().unwrap();

        let mut wire = BytesMut::new();
        frame.encode_into(&mut wire, Some(masking.next_key()));

        let mut reader = FrameReader::new();
        let mut src = BytesMut::new();
        for byte in wire.iter() {
            src.put_u8(*byte);
            if let Some(decoded) = reader
                .decode(&mut src, Some(&mut unmasking), inbound_size)
                .unwrap()
            {
                assert_eq!(decoded.opcode, 4);
                assert_eq!(&decoded.payload[..], &[9, 9, 9]);
            }
        }
        assert_eq!(unmasking.draws(), 1);
    }
}
