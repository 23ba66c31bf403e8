//! Incremental UTF-8 validation (spec component A).
//!
//! A direct reimplementation of Bjoern Hoehrmann's byte-oriented UTF-8 DFA
//! (<https://bjoern.hoehrmann.de/utf-8/decoder/dfa/>, public domain). The
//! automaton processes one byte at a time and carries only a small integer
//! of state between calls, so a streaming reader can fast-fail mid-frame
//! without ever buffering a whole message to call `str::from_utf8` on it.
//!
//! `feed` keeps the contract spec §4.1 prescribes: `ACCEPT` (0) means a
//! code point just completed, `REJECT` (1) is irrecoverable, anything else
//! is mid-sequence. The caller must check for `REJECT` after every byte.

/// A code point just completed; the stream is well-formed up to here.
pub const ACCEPT: u32 = 0;
/// The byte sequence is not valid UTF-8. This state never transitions out.
pub const REJECT: u32 = 1;

#[rustfmt::skip]
const BYTE_CLASS: [u8; 256] = [
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1, 9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,
    7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7, 7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,
    8,8,2,2,2,2,2,2,2,2,2,2,2,2,2,2, 2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,
    10,3,3,3,3,3,3,3,3,3,3,3,3,4,3,3, 11,6,6,6,5,8,8,8,8,8,8,8,8,8,8,8,
];

/// Row-major, 9 states (`raw_state / 12`) by 12 byte classes. `raw_state`
/// values are multiples of 12; dividing by 12 gives the public state that
/// spec §4.1 describes (0 = accept, 1 = reject).
#[rustfmt::skip]
const TRANSITIONS: [u8; 108] = [
     0,12,24,36,60,96,84,12,12,12,48,72,
    12,12,12,12,12,12,12,12,12,12,12,12,
    12, 0,12,12,12,12,12, 0,12, 0,12,12,
    12,24,12,12,12,12,12,24,12,24,12,12,
    12,12,12,12,12,12,12,24,12,12,12,12,
    12,24,12,12,12,12,12,12,12,24,12,12,
    12,12,12,12,12,12,12,36,12,36,12,12,
    12,36,12,12,12,12,12,36,12,36,12,12,
    12,36,12,12,12,12,12,12,12,12,12,12,
];

/// Feed one byte through the DFA. `state` must be the value returned by the
/// previous call (or `ACCEPT` for the first byte of a new message).
pub fn feed(state: u32, byte: u8) -> u32 {
    let class = BYTE_CLASS[byte as usize] as u32;
    let raw = state * 12 + class;
    (TRANSITIONS[raw as usize] as u32) / 12
}

/// Feed a whole byte slice through the DFA from `state`, short-circuiting
/// (fast-failing) the moment `REJECT` is reached.
pub fn feed_slice(mut state: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        state = feed(state, b);
        if state == REJECT {
            return REJECT;
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(bytes: &[u8]) -> u32 {
        feed_slice(ACCEPT, bytes)
    }

    #[test]
    fn accepts_ascii() {
        assert_eq!(validate(b"Hello, world!"), ACCEPT);
    }

    #[test]
    fn accepts_multibyte() {
        // "é" U+00E9, "中" U+4E2D, emoji U+1F600 (4-byte)
        assert_eq!(validate("é中😀".as_bytes()), ACCEPT);
    }

    #[test]
    fn rejects_overlong_encoding() {
        // 0xC0 0x80 is an overlong encoding of NUL.
        assert_eq!(validate(&[0xC0, 0x80]), REJECT);
    }

    #[test]
    fn rejects_lone_continuation_byte() {
        assert_eq!(validate(&[0x80]), REJECT);
    }

    #[test]
    fn rejects_surrogate_half() {
        // U+D800 encoded directly (0xED 0xA0 0x80) is a UTF-16 surrogate,
        // which is never legal UTF-8.
        assert_eq!(validate(&[0xED, 0xA0, 0x80]), REJECT);
    }

    #[test]
    fn mid_sequence_is_neither_accept_nor_reject() {
        let s = feed(ACCEPT, 0xC3); // first byte of 2-byte sequence for 'é'
        assert_ne!(s, ACCEPT);
        assert_ne!(s, REJECT);
        let s = feed(s, 0xA9);
        assert_eq!(s, ACCEPT);
    }

    #[test]
    fn chunking_is_irrelevant_to_final_state() {
        let whole = "hello é中😀 world".as_bytes();
        let one_shot = feed_slice(ACCEPT, whole);

        // Feed the same bytes split at every possible boundary and confirm
        // the final state matches, per spec §8 property 4.
        for split in 0..=whole.len() {
            let (a, b) = whole.split_at(split);
            let mid = feed_slice(ACCEPT, a);
            let chunked = feed_slice(mid, b);
            assert_eq!(chunked, one_shot, "split at {split}");
        }
    }

    #[test]
    fn fragmented_code_point_across_two_feeds_does_not_reject_early() {
        // B3 boundary scenario: split right at the code point boundary.
        let s = feed(ACCEPT, 0xC3);
        assert_ne!(s, REJECT);
        let s = feed(s, 0xA9);
        assert_eq!(s, ACCEPT);
    }
}
