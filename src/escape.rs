//! In-band control escape sequences (spec §6). Every session-control
//! message shares a fixed magic byte prefix followed by one ASCII digit
//! naming the message kind, followed by an optional text payload.
//!
//! No teacher analogue — built directly from the byte table spec §6
//! lists (see DESIGN.md OQ-1 for why this module treats the magic as 14
//! bytes, not the 11 the spec's prose headline names).

/// `CR STX "DCLinabox" ETX CR '\'` — 14 bytes, chosen because it's an
/// unlikely sequence to appear in ordinary terminal output.
pub const MAGIC_PREFIX: [u8; 14] =
    [0x0D, 0x02, b'D', b'C', b'L', b'i', b'n', b'a', b'b', b'o', b'x', 0x03, 0x0D, 0x5C];

/// Total bytes of prefix + code digit before any payload begins.
pub const HEADER_LEN: usize = MAGIC_PREFIX.len() + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// S->C: version string.
    Version(String),
    /// S->C: terminal title text.
    Title(String),
    /// S->C: the shell process terminated abruptly.
    Terminated,
    /// C->S or S->C: `<cols>x<rows>`, already parsed.
    Resize { cols: u16, rows: u16 },
    /// S->C: clean logout.
    Logout,
    /// S->C: a message for a browser alert dialog.
    Alert(String),
}

impl ControlMessage {
    fn code(&self) -> u8 {
        match self {
            ControlMessage::Version(_) => b'1',
            ControlMessage::Title(_) => b'2',
            ControlMessage::Terminated => b'3',
            ControlMessage::Resize { .. } => b'4',
            ControlMessage::Logout => b'5',
            ControlMessage::Alert(_) => b'6',
        }
    }

    /// Serializes into a full wire payload: magic prefix, code digit, tail.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16);
        out.extend_from_slice(&MAGIC_PREFIX);
        out.push(self.code());
        match self {
            ControlMessage::Version(s) | ControlMessage::Title(s) | ControlMessage::Alert(s) => {
                out.extend_from_slice(s.as_bytes());
            }
            ControlMessage::Resize { cols, rows } => {
                out.extend_from_slice(format!("{cols}x{rows}").as_bytes());
            }
            ControlMessage::Terminated | ControlMessage::Logout => {}
        }
        out
    }
}

/// Does `bytes` begin with the magic prefix?
pub fn has_magic_prefix(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC_PREFIX.len() && bytes[..MAGIC_PREFIX.len()] == MAGIC_PREFIX
}

/// Parses an incoming in-band control message. Only the client-originated
/// kind (resize request, code `4`) is expected from the wire in practice;
/// others decode for completeness/testing but a `Session` only ever
/// receives resize requests from the browser.
pub fn decode(bytes: &[u8]) -> Option<ControlMessage> {
    if !has_magic_prefix(bytes) || bytes.len() < HEADER_LEN {
        return None;
    }
    let code = bytes[MAGIC_PREFIX.len()];
    let tail = &bytes[HEADER_LEN..];
    let text = || String::from_utf8_lossy(tail).into_owned();

    match code {
        b'1' => Some(ControlMessage::Version(text())),
        b'2' => Some(ControlMessage::Title(text())),
        b'3' => Some(ControlMessage::Terminated),
        b'4' => parse_resize(tail),
        b'5' => Some(ControlMessage::Logout),
        b'6' => Some(ControlMessage::Alert(text())),
        _ => None,
    }
}

/// Parses `<cols>x<rows>` and clamps into the ranges spec §4.8 specifies
/// (cols 48..=511, rows 10..=255). Out-of-range values are silently
/// ignored (returns `None`), matching "out-of-range silently ignored".
fn parse_resize(tail: &[u8]) -> Option<ControlMessage> {
    let text = std::str::from_utf8(tail).ok()?;
    let (cols_str, rows_str) = text.split_once('x')?;
    let cols: u16 = cols_str.parse().ok()?;
    let rows: u16 = rows_str.parse().ok()?;
    if !(48..=511).contains(&cols) || !(10..=255).contains(&rows) {
        return None;
    }
    Some(ControlMessage::Resize { cols, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_request_round_trips() {
        let msg = ControlMessage::Resize { cols: 80, rows: 24 };
        let wire = msg.encode();
        assert_eq!(decode(&wire), Some(msg));
    }

    #[test]
    fn out_of_range_resize_is_ignored() {
        let wire = ControlMessage::Resize { cols: 10, rows: 5 }.encode();
        // can't construct an out-of-range ControlMessage directly since
        // encode() doesn't validate; build the wire bytes by hand instead.
        let mut bytes = MAGIC_PREFIX.to_vec();
        bytes.push(b'4');
        bytes.extend_from_slice(b"10x5");
        assert_eq!(decode(&bytes), None);
        let _ = wire; // silence unused in case encode ever validates
    }

    #[test]
    fn plain_terminal_output_has_no_magic_prefix() {
        assert!(!has_magic_prefix(b"$ ls -la\r\n"));
    }

    #[test]
    fn alert_message_round_trips() {
        let msg = ControlMessage::Alert("server restarting in 5 minutes".to_string());
        let wire = msg.encode();
        assert_eq!(decode(&wire), Some(msg));
    }

    #[test]
    fn logout_has_no_payload() {
        let wire = ControlMessage::Logout.encode();
        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(decode(&wire), Some(ControlMessage::Logout));
    }
}
