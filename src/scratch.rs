//! Masking-key generation and the masking scratch buffer (spec §4.2, §9
//! "Ownership of the masking buffer").
//!
//! The original VMS implementation seeds a mixed LCG (`x <- x*69069 + 1`)
//! from a system clock sample. Spec §9 flags that as non-cryptographic and
//! asks a reimplementation to prefer a CSPRNG, which is also what the
//! teacher already does in its `write.rs` (`StdRng::from_rng`). This
//! module follows the teacher's choice (see DESIGN.md OQ-4).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A fresh 4-byte masking key, generated per frame as spec §4.2 requires.
pub fn generate_masking_key() -> [u8; 4] {
    let mut rng = StdRng::from_rng(rand::thread_rng());
    rng.random()
}

/// XOR-masks `payload` with `key`, writing into a fresh buffer so the
/// caller's original bytes are never mutated (spec §4.2/§4.5/§9).
pub fn mask_into_scratch(payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for (i, &byte) in payload.iter().enumerate() {
        out.push(byte ^ key[i % 4]);
    }
    out
}

/// Unmasks `payload` in place. XOR is its own inverse (spec §8 property 3).
pub fn unmask_in_place(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Unmasks a single byte at stream offset `cursor`, as the reader does
/// while streaming a payload chunk through the UTF-8 validator (spec
/// §4.4 step 5: "the mask must be applied as each byte is read").
pub fn unmask_byte(byte: u8, key: [u8; 4], cursor: usize) -> u8 {
    byte ^ key[cursor % 4]
}
