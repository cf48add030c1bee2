//! # Core Wire Codec
//!
//! Stateless read/write primitives for the legacy binary frame format.
//!
//! ## Components
//! - **Buffer**: byte-aligned writer/reader with byte-order and value-obfuscation variants
//! - **Bits**: the bit-packed sub-mode, modelled as a separate view that borrows the writer
//! - **Frame**: opcode framing (fixed, one-byte length, two-byte length, unbounded)
//! - **Text**: terminated strings, packed chat text and base-37 names
//!
//! ## Wire Format
//! ```text
//! [Opcode(1, keystream-masked)] [Length(0|1|2)] [Payload(N)]
//! ```
//!
//! Lengths are back-patched once the payload is complete, so a frame can be
//! built in a single pass even when its payload mixes bit and byte regions.

pub mod bits;
pub mod buffer;
pub mod frame;
pub mod text;

pub use bits::{BitReader, BitWriter};
pub use buffer::{ByteOrder, PacketReader, PacketWriter, Transform};
pub use frame::{FrameBuilder, FrameReader, FrameSize, InboundFrame, OutgoingFrame};
