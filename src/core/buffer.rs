//! # Byte Buffers
//!
//! Byte-aligned views over frame payloads.
//!
//! The legacy format stores integers in four byte orders and obfuscates the
//! least-significant byte of a field with one of four transforms. Writers
//! apply a transform, readers reverse it, and both agree on which byte is
//! touched, so every field round-trips exactly.
//!
//! ```rust
//! use realm_protocol::core::buffer::{ByteOrder, PacketReader, PacketWriter, Transform};
//!
//! let mut writer = PacketWriter::new();
//! writer.put_u16_with(0x1234, ByteOrder::Little, Transform::Add).unwrap();
//! writer.put_u32_with(0xCAFE_BABE, ByteOrder::Middle, Transform::None).unwrap();
//!
//! let bytes = writer.freeze();
//! let mut reader = PacketReader::new(&bytes);
//! assert_eq!(reader.get_u16_with(ByteOrder::Little, Transform::Add).unwrap(), 0x1234);
//! assert_eq!(reader.get_u32_with(ByteOrder::Middle, Transform::None).unwrap(), 0xCAFE_BABE);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::bits::BitWriter;
use crate::core::text;
use crate::error::{constants, ProtocolError, Result};

/// Value obfuscation applied to the least-significant byte of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Transform {
    /// Byte is written unchanged
    #[default]
    None,
    /// `value + 128`
    Add,
    /// `-value`
    Negate,
    /// `128 - value`
    Subtract,
}

impl Transform {
    /// All transforms, in declaration order.
    pub const ALL: [Transform; 4] = [
        Transform::None,
        Transform::Add,
        Transform::Negate,
        Transform::Subtract,
    ];

    /// Obfuscate a byte for the wire.
    #[inline]
    pub fn apply(self, byte: u8) -> u8 {
        match self {
            Transform::None => byte,
            Transform::Add => byte.wrapping_add(128),
            Transform::Negate => 0u8.wrapping_sub(byte),
            Transform::Subtract => 128u8.wrapping_sub(byte),
        }
    }

    /// Reverse [`Transform::apply`].
    #[inline]
    pub fn reverse(self, byte: u8) -> u8 {
        match self {
            Transform::None => byte,
            Transform::Add => byte.wrapping_sub(128),
            Transform::Negate => 0u8.wrapping_sub(byte),
            Transform::Subtract => 128u8.wrapping_sub(byte),
        }
    }
}

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    Big,
    /// Least significant byte first
    Little,
    /// 32-bit only: bytes `[1, 0, 3, 2]` (byte 0 is least significant)
    Middle,
    /// 32-bit only: bytes `[2, 3, 0, 1]`
    InverseMiddle,
}

impl ByteOrder {
    /// All byte orders, in declaration order.
    pub const ALL: [ByteOrder; 4] = [
        ByteOrder::Big,
        ByteOrder::Little,
        ByteOrder::Middle,
        ByteOrder::InverseMiddle,
    ];

    fn name(self) -> &'static str {
        match self {
            ByteOrder::Big => "big-endian",
            ByteOrder::Little => "little-endian",
            ByteOrder::Middle => "middle-endian",
            ByteOrder::InverseMiddle => "inverse-middle-endian",
        }
    }

    /// Byte indices (0 = least significant) in wire order for a field of `width` bytes.
    fn layout(self, width: usize) -> Result<&'static [usize]> {
        const BIG: [usize; 8] = [7, 6, 5, 4, 3, 2, 1, 0];
        const LITTLE: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

        match (self, width) {
            (ByteOrder::Big, 1..=8) => Ok(&BIG[8 - width..]),
            (ByteOrder::Little, 1..=8) => Ok(&LITTLE[..width]),
            (ByteOrder::Middle, 4) => Ok(&[1, 0, 3, 2]),
            (ByteOrder::InverseMiddle, 4) => Ok(&[2, 3, 0, 1]),
            _ => Err(ProtocolError::InvalidByteOrder {
                order: self.name(),
                width,
            }),
        }
    }
}

/// Growable byte-mode writer for a frame payload.
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Enter bit mode.
    ///
    /// The returned view mutably borrows this writer, so no byte-aligned write
    /// can happen until the view is finished or dropped. Leaving bit mode pads
    /// the final partial byte with zeros.
    pub fn bits(&mut self) -> BitWriter<'_> {
        BitWriter::new(&mut self.buf)
    }

    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    #[inline]
    pub fn put_u8_t(&mut self, value: u8, transform: Transform) {
        self.buf.put_u8(transform.apply(value));
    }

    #[inline]
    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    #[inline]
    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    /// Write the low `width` bytes of `value` in `order`, obfuscating the
    /// least-significant byte with `transform`.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidByteOrder` for middle orders on widths other than 4.
    pub fn put_int(
        &mut self,
        width: usize,
        value: u64,
        order: ByteOrder,
        transform: Transform,
    ) -> Result<()> {
        let layout = order.layout(width)?;
        self.buf.reserve(width);
        for &index in layout {
            let byte = (value >> (index * 8)) as u8;
            if index == 0 {
                self.buf.put_u8(transform.apply(byte));
            } else {
                self.buf.put_u8(byte);
            }
        }
        Ok(())
    }

    pub fn put_u16_with(&mut self, value: u16, order: ByteOrder, transform: Transform) -> Result<()> {
        self.put_int(2, value as u64, order, transform)
    }

    /// Tri-byte field, used by a handful of legacy frames.
    pub fn put_u24(&mut self, value: u32) {
        self.buf.put_u8((value >> 16) as u8);
        self.buf.put_u8((value >> 8) as u8);
        self.buf.put_u8(value as u8);
    }

    pub fn put_u32_with(&mut self, value: u32, order: ByteOrder, transform: Transform) -> Result<()> {
        self.put_int(4, value as u64, order, transform)
    }

    pub fn put_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write `data` back to front, obfuscating every byte.
    pub fn put_bytes_reversed(&mut self, data: &[u8], transform: Transform) {
        self.buf.reserve(data.len());
        for &byte in data.iter().rev() {
            self.buf.put_u8(transform.apply(byte));
        }
    }

    /// Write a sentinel-terminated string.
    pub fn put_string(&mut self, value: &str) {
        text::encode_latin1_into(value, &mut self.buf);
        self.buf.put_u8(text::STRING_TERMINATOR);
    }
}

/// Cursor over a received frame payload.
///
/// Reads never run past the payload window the frame declared; a short read
/// is a `ProtocolError::Underflow`, not a panic.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(ProtocolError::Underflow {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u8_t(&mut self, transform: Transform) -> Result<u8> {
        Ok(transform.reverse(self.get_u8()?))
    }

    pub fn get_i8_t(&mut self, transform: Transform) -> Result<i8> {
        Ok(self.get_u8_t(transform)? as i8)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.get_u16_with(ByteOrder::Big, Transform::None)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.get_u32_with(ByteOrder::Big, Transform::None)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.get_int(8, ByteOrder::Big, Transform::None)
    }

    /// Read a `width`-byte field written by [`PacketWriter::put_int`].
    pub fn get_int(&mut self, width: usize, order: ByteOrder, transform: Transform) -> Result<u64> {
        let layout = order.layout(width)?;
        let raw = self.take(width)?;
        let mut value = 0u64;
        for (&index, &byte) in layout.iter().zip(raw) {
            let byte = if index == 0 {
                transform.reverse(byte)
            } else {
                byte
            };
            value |= (byte as u64) << (index * 8);
        }
        Ok(value)
    }

    pub fn get_u16_with(&mut self, order: ByteOrder, transform: Transform) -> Result<u16> {
        Ok(self.get_int(2, order, transform)? as u16)
    }

    pub fn get_i16_with(&mut self, order: ByteOrder, transform: Transform) -> Result<i16> {
        Ok(self.get_u16_with(order, transform)? as i16)
    }

    pub fn get_u24(&mut self) -> Result<u32> {
        Ok(self.get_int(3, ByteOrder::Big, Transform::None)? as u32)
    }

    pub fn get_u32_with(&mut self, order: ByteOrder, transform: Transform) -> Result<u32> {
        Ok(self.get_int(4, order, transform)? as u32)
    }

    pub fn get_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Read `count` bytes stored back to front, reversing the transform on each.
    pub fn get_bytes_reversed(&mut self, count: usize, transform: Transform) -> Result<Vec<u8>> {
        let raw = self.take(count)?;
        Ok(raw.iter().rev().map(|&b| transform.reverse(b)).collect())
    }

    /// Read a string terminated by either legacy sentinel (`\n` or NUL).
    pub fn get_string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| text::is_terminator(b))
            .ok_or_else(|| ProtocolError::MalformedFrame {
                opcode: 0,
                reason: constants::ERR_MISSING_TERMINATOR.into(),
            })?;
        let value = text::decode_latin1(&rest[..end]);
        self.pos += end + 1;
        Ok(value)
    }

    /// Remaining unread bytes, consuming them.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}
