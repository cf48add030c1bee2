//! # Bit Mode
//!
//! MSB-first bit packing used by the entity update frames.
//!
//! A [`BitWriter`] is a view that mutably borrows the underlying
//! [`PacketWriter`](crate::core::buffer::PacketWriter). While the view is
//! alive, byte-aligned writes are rejected by the borrow checker, so mixing
//! the two modes by accident does not compile:
//!
//! ```compile_fail
//! use realm_protocol::core::buffer::PacketWriter;
//!
//! let mut writer = PacketWriter::new();
//! let mut bits = writer.bits();
//! writer.put_u8(1);
//! bits.write_bits(1, 1).unwrap();
//! ```
//!
//! Finishing (or dropping) the view returns to byte alignment. The trailing
//! partial byte is zero padded, so `n` bits always occupy `ceil(n / 8)` bytes.
//!
//! ```rust
//! use realm_protocol::core::buffer::PacketWriter;
//!
//! let mut writer = PacketWriter::new();
//! let mut bits = writer.bits();
//! bits.write_bits(1, 1).unwrap();
//! bits.write_bits(2, 3).unwrap();
//! assert_eq!(bits.finish(), 3);
//! writer.put_u8(0xFF);
//! assert_eq!(writer.as_bytes(), &[0b1110_0000, 0xFF]);
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{ProtocolError, Result};

/// Largest bit count a single read or write may cover.
pub const MAX_BITS: u32 = 32;

fn check_count(count: u32) -> Result<()> {
    if count == 0 || count > MAX_BITS {
        return Err(ProtocolError::InvalidBitCount(count));
    }
    Ok(())
}

/// Bit-mode view over a frame payload.
#[derive(Debug)]
pub struct BitWriter<'a> {
    buf: &'a mut BytesMut,
    start: usize,
    bit_pos: usize,
}

impl<'a> BitWriter<'a> {
    pub(crate) fn new(buf: &'a mut BytesMut) -> Self {
        let start = buf.len() * 8;
        Self {
            buf,
            start,
            bit_pos: start,
        }
    }

    /// Bits written through this view.
    pub fn bits_written(&self) -> usize {
        self.bit_pos - self.start
    }

    /// Write the low `count` bits of `value`, most significant first.
    ///
    /// # Errors
    /// - `InvalidBitCount` when `count` is outside `1..=32`
    /// - `ValueOutOfRange` when `value` does not fit in `count` bits
    pub fn write_bits(&mut self, count: u32, value: u32) -> Result<()> {
        check_count(count)?;
        if count < MAX_BITS && (value >> count) != 0 {
            return Err(ProtocolError::ValueOutOfRange {
                value: value as i64,
                bits: count,
            });
        }

        let value = value as u64;
        let mut remaining = count as usize;
        while remaining > 0 {
            let index = self.bit_pos / 8;
            if index == self.buf.len() {
                self.buf.put_u8(0);
            }
            let free = 8 - self.bit_pos % 8;
            let take = remaining.min(free);
            let chunk = ((value >> (remaining - take)) & ((1u64 << take) - 1)) as u8;
            self.buf[index] |= chunk << (free - take);
            self.bit_pos += take;
            remaining -= take;
        }
        Ok(())
    }

    /// Write a single flag bit.
    pub fn write_bit(&mut self, flag: bool) -> Result<()> {
        self.write_bits(1, flag as u32)
    }

    /// Write a two's complement value in `count` bits.
    ///
    /// # Errors
    /// Returns `ValueOutOfRange` when `value` is outside the signed range of `count` bits.
    pub fn write_signed(&mut self, count: u32, value: i32) -> Result<()> {
        check_count(count)?;
        let min = -(1i64 << (count - 1));
        let max = (1i64 << (count - 1)) - 1;
        if (value as i64) < min || (value as i64) > max {
            return Err(ProtocolError::ValueOutOfRange {
                value: value as i64,
                bits: count,
            });
        }
        let mask = if count == MAX_BITS {
            u32::MAX
        } else {
            (1u32 << count) - 1
        };
        self.write_bits(count, (value as u32) & mask)
    }

    /// Leave bit mode. Returns the number of bits written.
    pub fn finish(self) -> usize {
        self.bits_written()
    }
}

/// Bit-mode cursor over received bytes.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u32> {
        check_count(count)?;
        let available = self.data.len() * 8 - self.bit_pos;
        if (count as usize) > available {
            return Err(ProtocolError::Underflow {
                needed: (count as usize).div_ceil(8),
                remaining: available / 8,
            });
        }

        let mut value = 0u64;
        let mut remaining = count as usize;
        while remaining > 0 {
            let byte = self.data[self.bit_pos / 8];
            let free = 8 - self.bit_pos % 8;
            let take = remaining.min(free);
            let chunk = (byte >> (free - take)) as u64 & ((1u64 << take) - 1);
            value = (value << take) | chunk;
            self.bit_pos += take;
            remaining -= take;
        }
        Ok(value as u32)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_signed(&mut self, count: u32) -> Result<i32> {
        let raw = self.read_bits(count)?;
        if count == MAX_BITS {
            return Ok(raw as i32);
        }
        let shift = MAX_BITS - count;
        Ok(((raw << shift) as i32) >> shift)
    }

    /// Bytes spanned so far, counting a partial byte as whole.
    pub fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::buffer::PacketWriter;
    use proptest::prelude::*;

    #[test]
    fn test_bit_count_bounds() {
        let mut writer = PacketWriter::new();
        let mut bits = writer.bits();
        assert!(matches!(
            bits.write_bits(0, 0),
            Err(ProtocolError::InvalidBitCount(0))
        ));
        assert!(matches!(
            bits.write_bits(33, 0),
            Err(ProtocolError::InvalidBitCount(33))
        ));
        bits.write_bits(32, u32::MAX).unwrap();
        assert_eq!(bits.finish(), 32);
        assert_eq!(writer.as_bytes(), &[0xFF; 4]);
    }

    #[test]
    fn test_value_must_fit() {
        let mut writer = PacketWriter::new();
        let mut bits = writer.bits();
        assert!(matches!(
            bits.write_bits(3, 8),
            Err(ProtocolError::ValueOutOfRange { value: 8, bits: 3 })
        ));
        assert!(bits.write_signed(5, 16).is_err());
        assert!(bits.write_signed(5, -17).is_err());
        bits.write_signed(5, -16).unwrap();
        bits.write_signed(5, 15).unwrap();
    }

    #[test]
    fn test_bits_continue_after_existing_bytes() {
        let mut writer = PacketWriter::new();
        writer.put_u8(0xAA);
        {
            let mut bits = writer.bits();
            bits.write_bits(4, 0b1010).unwrap();
            bits.write_bits(8, 0xFF).unwrap();
        }
        writer.put_u8(0x01);
        assert_eq!(writer.as_bytes(), &[0xAA, 0b1010_1111, 0b1111_0000, 0x01]);
    }

    #[test]
    fn test_signed_read_back() {
        let mut writer = PacketWriter::new();
        {
            let mut bits = writer.bits();
            bits.write_signed(5, -3).unwrap();
            bits.write_signed(5, 7).unwrap();
        }
        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(reader.read_signed(5).unwrap(), -3);
        assert_eq!(reader.read_signed(5).unwrap(), 7);
        assert_eq!(reader.bytes_consumed(), 2);
    }

    proptest! {
        #[test]
        fn prop_bit_fields_round_trip(fields in prop::collection::vec((1u32..=32, any::<u32>()), 0..64)) {
            let fields: Vec<(u32, u32)> = fields
                .into_iter()
                .map(|(count, value)| {
                    let value = if count == 32 { value } else { value & ((1 << count) - 1) };
                    (count, value)
                })
                .collect();

            let mut writer = PacketWriter::new();
            let total = {
                let mut bits = writer.bits();
                for &(count, value) in &fields {
                    bits.write_bits(count, value).unwrap();
                }
                bits.finish()
            };

            prop_assert_eq!(writer.len(), total.div_ceil(8));

            let mut reader = BitReader::new(writer.as_bytes());
            for &(count, value) in &fields {
                prop_assert_eq!(reader.read_bits(count).unwrap(), value);
            }
        }
    }
}
