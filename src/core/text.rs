//! # Legacy Text Encodings
//!
//! - Terminated strings: Latin-1 bytes followed by `\n`; `\0` is also accepted on read
//! - Packed chat text: a 61-symbol alphabet, frequent symbols in one nibble
//! - Base-37 names: up to 12 characters folded into a `u64`

use bytes::{BufMut, BytesMut};

/// Terminator written after every string.
pub const STRING_TERMINATOR: u8 = 10;

/// Longest chat line the packer will encode.
pub const MAX_CHAT_LENGTH: usize = 80;

/// Longest name representable in base 37.
pub const MAX_NAME_LENGTH: usize = 12;

/// Symbols with an index below this fit in a single nibble.
const NIBBLE_LIMIT: usize = 13;
const WIDE_OFFSET: usize = 195;

const CHAT_ALPHABET: [char; 61] = [
    ' ', 'e', 't', 'a', 'o', 'i', 'h', 'n', 's', 'r', 'd', 'l', 'u', 'm', 'w', 'c', 'y', 'f', 'g',
    'p', 'b', 'v', 'k', 'x', 'j', 'q', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ' ',
    '!', '?', '.', ',', ':', ';', '(', ')', '-', '&', '*', '\\', '\'', '@', '#', '+', '=', '£',
    '$', '%', '"', '[', ']',
];

const NAME_ALPHABET: [char; 37] = [
    '_', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Values at or above this encode names longer than 12 characters.
const NAME_CEILING: u64 = 0x5b5b_57f8_a98a_5dd1;

#[inline]
pub(crate) fn is_terminator(byte: u8) -> bool {
    byte == STRING_TERMINATOR || byte == 0
}

pub(crate) fn encode_latin1_into(value: &str, dst: &mut BytesMut) {
    dst.reserve(value.len());
    for c in value.chars() {
        let code = c as u32;
        let byte = if code <= 0xFF && !is_terminator(code as u8) {
            code as u8
        } else {
            b'?'
        };
        dst.put_u8(byte);
    }
}

pub(crate) fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Pack chat text into the nibble encoding. Input is lowercased, symbols
/// outside the alphabet become spaces and anything past
/// [`MAX_CHAT_LENGTH`] is dropped.
pub fn pack_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut carry: Option<usize> = None;

    for c in text.chars().flat_map(char::to_lowercase).take(MAX_CHAT_LENGTH) {
        let mut index = CHAT_ALPHABET.iter().position(|&s| s == c).unwrap_or(0);
        if index >= NIBBLE_LIMIT {
            index += WIDE_OFFSET;
        }

        match carry.take() {
            None if index < NIBBLE_LIMIT => carry = Some(index),
            None => out.push(index as u8),
            Some(high) if index < NIBBLE_LIMIT => out.push(((high << 4) + index) as u8),
            Some(high) => {
                out.push(((high << 4) + (index >> 4)) as u8);
                carry = Some(index & 0xF);
            }
        }
    }

    if let Some(high) = carry {
        out.push((high << 4) as u8);
    }
    out
}

/// Unpack nibble-encoded chat text, trimming trailing spaces.
pub fn unpack_text(packed: &[u8]) -> String {
    let mut out = String::with_capacity(packed.len() * 2);
    let mut pending: Option<usize> = None;

    for &byte in packed {
        for nibble in [(byte >> 4) as usize, (byte & 0xF) as usize] {
            match pending.take() {
                None if nibble < NIBBLE_LIMIT => out.push(CHAT_ALPHABET[nibble]),
                None => pending = Some(nibble),
                Some(high) => {
                    if let Some(&c) = CHAT_ALPHABET.get((high << 4) + nibble - WIDE_OFFSET) {
                        out.push(c);
                    }
                }
            }
        }
    }

    out.truncate(out.trim_end_matches(' ').len());
    out
}

/// Fold a name into base 37. Characters past the twelfth are ignored and
/// anything outside `[A-Za-z0-9]` counts as a space.
pub fn encode_name(name: &str) -> u64 {
    let mut value = 0u64;
    for c in name.chars().take(MAX_NAME_LENGTH) {
        value = value.wrapping_mul(37);
        value += match c {
            'a'..='z' => 1 + (c as u64 - 'a' as u64),
            'A'..='Z' => 1 + (c as u64 - 'A' as u64),
            '0'..='9' => 27 + (c as u64 - '0' as u64),
            _ => 0,
        };
    }
    while value != 0 && value % 37 == 0 {
        value /= 37;
    }
    value
}

/// Expand a base-37 name. Spaces come back as underscores.
///
/// Returns `None` for values no valid name produces.
pub fn decode_name(mut value: u64) -> Option<String> {
    if value == 0 || value >= NAME_CEILING || value % 37 == 0 {
        return None;
    }
    let mut chars = Vec::with_capacity(MAX_NAME_LENGTH);
    while value != 0 {
        chars.push(NAME_ALPHABET[(value % 37) as usize]);
        value /= 37;
    }
    Some(chars.into_iter().rev().collect())
}
