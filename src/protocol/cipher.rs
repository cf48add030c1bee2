//! # Opcode Stream Cipher
//!
//! ISAAC keystream used to mask frame opcodes once a session is active.
//!
//! Each direction owns an independent generator. Both are seeded from the
//! 64-bit key halves exchanged during login; the server-to-client generator
//! offsets every seed word by [`OUTBOUND_SEED_OFFSET`]. Each frame header
//! consumes exactly one word, so client and server stay in lockstep only as
//! long as both sides process frames in the same order.
//!
//! ```rust
//! use realm_protocol::protocol::cipher::CipherPair;
//!
//! // Client and server derive mirrored pairs from the same halves.
//! let mut server = CipherPair::from_halves(0x1111, 0x2222);
//! let mut client = CipherPair::from_halves(0x1111, 0x2222);
//!
//! let masked = 81u8.wrapping_add(server.outbound.next_key() as u8);
//! let unmasked = masked.wrapping_sub(client.outbound.next_key() as u8);
//! assert_eq!(unmasked, 81);
//! ```

const SIZE: usize = 256;
const MASK: u32 = (SIZE as u32 - 1) << 2;
const GOLDEN_RATIO: u32 = 0x9e37_79b9;

/// Added to each seed word of the server-to-client generator.
pub const OUTBOUND_SEED_OFFSET: u32 = 50;

/// One direction's keystream generator.
#[derive(Clone)]
pub struct IsaacCipher {
    results: [u32; SIZE],
    memory: [u32; SIZE],
    a: u32,
    b: u32,
    c: u32,
    count: usize,
    draws: u64,
}

impl std::fmt::Debug for IsaacCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keystream state stays out of logs.
        f.debug_struct("IsaacCipher")
            .field("draws", &self.draws)
            .finish_non_exhaustive()
    }
}

#[inline]
fn mix(s: &mut [u32; 8]) {
    s[0] ^= s[1] << 11;
    s[3] = s[3].wrapping_add(s[0]);
    s[1] = s[1].wrapping_add(s[2]);
    s[1] ^= s[2] >> 2;
    s[4] = s[4].wrapping_add(s[1]);
    s[2] = s[2].wrapping_add(s[3]);
    s[2] ^= s[3] << 8;
    s[5] = s[5].wrapping_add(s[2]);
    s[3] = s[3].wrapping_add(s[4]);
    s[3] ^= s[4] >> 16;
    s[6] = s[6].wrapping_add(s[3]);
    s[4] = s[4].wrapping_add(s[5]);
    s[4] ^= s[5] << 10;
    s[7] = s[7].wrapping_add(s[4]);
    s[5] = s[5].wrapping_add(s[6]);
    s[5] ^= s[6] >> 4;
    s[0] = s[0].wrapping_add(s[5]);
    s[6] = s[6].wrapping_add(s[7]);
    s[6] ^= s[7] << 8;
    s[1] = s[1].wrapping_add(s[6]);
    s[7] = s[7].wrapping_add(s[0]);
    s[7] ^= s[0] >> 9;
    s[2] = s[2].wrapping_add(s[7]);
    s[0] = s[0].wrapping_add(s[1]);
}

impl IsaacCipher {
    /// Seed a generator. Words beyond the 256th are ignored; missing words are zero.
    pub fn new(seed: &[u32]) -> Self {
        let mut cipher = Self {
            results: [0; SIZE],
            memory: [0; SIZE],
            a: 0,
            b: 0,
            c: 0,
            count: 0,
            draws: 0,
        };
        for (slot, &word) in cipher.results.iter_mut().zip(seed) {
            *slot = word;
        }
        cipher.init();
        cipher
    }

    /// Next keystream word.
    pub fn next_key(&mut self) -> u32 {
        if self.count == 0 {
            self.generate();
            self.count = SIZE;
        }
        self.count -= 1;
        self.draws += 1;
        self.results[self.count]
    }

    /// Words drawn since seeding.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    fn init(&mut self) {
        let mut s = [GOLDEN_RATIO; 8];
        for _ in 0..4 {
            mix(&mut s);
        }

        for pass in 0..2 {
            for i in (0..SIZE).step_by(8) {
                let source = if pass == 0 { &self.results } else { &self.memory };
                for (k, word) in s.iter_mut().enumerate() {
                    *word = word.wrapping_add(source[i + k]);
                }
                mix(&mut s);
                self.memory[i..i + 8].copy_from_slice(&s);
            }
        }

        self.generate();
        self.count = SIZE;
    }

    fn generate(&mut self) {
        self.c = self.c.wrapping_add(1);
        self.b = self.b.wrapping_add(self.c);

        for i in 0..SIZE {
            let x = self.memory[i];
            self.a ^= match i & 3 {
                0 => self.a << 13,
                1 => self.a >> 6,
                2 => self.a << 2,
                _ => self.a >> 16,
            };
            self.a = self.a.wrapping_add(self.memory[(i + SIZE / 2) & (SIZE - 1)]);
            let y = self.memory[((x & MASK) >> 2) as usize]
                .wrapping_add(self.a)
                .wrapping_add(self.b);
            self.memory[i] = y;
            self.b = self.memory[(((y >> 8) & MASK) >> 2) as usize].wrapping_add(x);
            self.results[i] = self.b;
        }
    }
}

/// The two generators of an active session.
#[derive(Debug, Clone)]
pub struct CipherPair {
    /// Unmasks client-to-server opcodes
    pub inbound: IsaacCipher,
    /// Masks server-to-client opcodes
    pub outbound: IsaacCipher,
}

impl CipherPair {
    /// Derive both generators from the client and server key halves.
    pub fn from_halves(client_key: u64, server_key: u64) -> Self {
        let seed = [
            (client_key >> 32) as u32,
            client_key as u32,
            (server_key >> 32) as u32,
            server_key as u32,
        ];
        let outbound_seed = seed.map(|word| word.wrapping_add(OUTBOUND_SEED_OFFSET));
        Self {
            inbound: IsaacCipher::new(&seed),
            outbound: IsaacCipher::new(&outbound_seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_seeds_identical_streams() {
        let mut left = IsaacCipher::new(&[7, 8, 9, 10]);
        let mut right = IsaacCipher::new(&[7, 8, 9, 10]);
        for _ in 0..1000 {
            assert_eq!(left.next_key(), right.next_key());
        }
        assert_eq!(left.draws(), 1000);
    }

    #[test]
    fn test_directions_diverge() {
        let mut pair = CipherPair::from_halves(0xDEAD_BEEF_0000_0001, 0x0123_4567_89AB_CDEF);
        let inbound: Vec<u32> = (0..16).map(|_| pair.inbound.next_key()).collect();
        let outbound: Vec<u32> = (0..16).map(|_| pair.outbound.next_key()).collect();
        assert_ne!(inbound, outbound);
    }

    #[test]
    fn test_stream_continues_across_refill() {
        let mut cipher = IsaacCipher::new(&[1]);
        let first_block: Vec<u32> = (0..SIZE).map(|_| cipher.next_key()).collect();
        let second_block: Vec<u32> = (0..SIZE).map(|_| cipher.next_key()).collect();
        assert_ne!(first_block, second_block);
    }

    #[test]
    fn test_opcode_mask_round_trip() {
        let mut sender = CipherPair::from_halves(42, 99);
        let mut receiver = CipherPair::from_halves(42, 99);
        for opcode in 0..=255u8 {
            let masked = opcode.wrapping_add(sender.inbound.next_key() as u8);
            assert_eq!(masked.wrapping_sub(receiver.inbound.next_key() as u8), opcode);
        }
    }

    #[test]
    fn test_debug_hides_state() {
        let cipher = IsaacCipher::new(&[1, 2, 3, 4]);
        let rendered = format!("{cipher:?}");
        assert!(rendered.contains("draws"));
        assert!(!rendered.contains("results"));
    }
}
