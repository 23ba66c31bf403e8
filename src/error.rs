//! Error taxonomy (spec §7). Every variant maps to one of the five failure
//! classes spec §7 defines; [`Error::close_code`] and [`Error::reason`]
//! give the fields a [`crate::connection::Connection`] needs to build the
//! close frame spec §4.6/§7 describes.

use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// RFC 6455 close status codes used by this crate (spec §7).
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const BYEBYE: u16 = 1001;
    pub const PROTOCOL: u16 = 1002;
    pub const DATA: u16 = 1007;
    pub const POLICY: u16 = 1008;
}

#[derive(Error, Debug)]
pub enum Error {
    // ---- Protocol errors (spec §7: malformed frame -> close 1002) ----
    #[error("RSV bit set: 0x{0:02x}")]
    RsvNotZero(u8),

    #[error("unknown opcode 0x{0:x}")]
    UnknownOpcode(u8),

    #[error("control frame fragmented")]
    ControlFrameFragmented,

    #[error("control frame payload too large: {0} bytes")]
    ControlFramePayloadTooLarge(usize),

    #[error("frame without mask bit in server role")]
    UnmaskedFrameFromClient,

    #[error("payload length {0} exceeds the 2^32-1 sanity cap")]
    PayloadTooLarge(u64),

    #[error("data frame received while a fragmented message is already in progress")]
    FragmentedMessageInProgress,

    #[error("continuation frame with no message in progress")]
    UnexpectedContinuation,

    #[error("message's first frame must be text or binary")]
    InvalidFirstFrameOpcode,

    // ---- Data errors (spec §7: UTF-8 -> close 1007; size -> overflow) ----
    #[error("UTF-8 illegal")]
    InvalidUtf8,

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("assembled message of {0} bytes exceeds the configured cap of {1} bytes")]
    MessageTooLarge(usize, usize),

    // ---- Transport errors (spec §7: abrupt close, no close frame) ----
    #[error("{source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("peer closed the connection without a close handshake")]
    PeerEof,

    #[error("connection already shut down")]
    AlreadyShut,

    #[error("double-grab of a message buffer")]
    DoubleGrab,

    // ---- Policy timeouts (spec §7: close 1008, graceful) ----
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("read wait exceeded")]
    ReadTimeout,

    #[error("idle connection")]
    IdleTimeout,

    // ---- Configuration / admission errors (spec §6/§7: HTTP 403/426) ----
    #[error("\"{0}\" undefined")]
    ConfigUndefined(String),

    #[error("access denied for {0}")]
    AccessDenied(String),

    #[error("unsupported Sec-WebSocket-Version: {0}")]
    UnsupportedVersion(String),

    #[error("no pseudo-terminal could be created: {0}")]
    PtyCreationFailed(String),
}

impl Error {
    /// The close code spec §7 prescribes for this error, if the connection
    /// should send a close frame at all (`None` means an abrupt/"bang"
    /// shutdown with no close frame, per spec §4.6).
    pub fn close_code(&self) -> Option<u16> {
        use Error::*;
        match self {
            RsvNotZero(_)
            | UnknownOpcode(_)
            | ControlFrameFragmented
            | ControlFramePayloadTooLarge(_)
            | UnmaskedFrameFromClient
            | PayloadTooLarge(_)
            | FragmentedMessageInProgress
            | UnexpectedContinuation
            | InvalidFirstFrameOpcode => Some(close_code::PROTOCOL),

            InvalidUtf8 | FromUtf8Error { .. } => Some(close_code::DATA),

            ReadTimeout | IdleTimeout => Some(close_code::POLICY),

            MessageTooLarge(_, _) => None,

            Io { .. } | PeerEof | AlreadyShut | DoubleGrab | Timeout { .. } => None,

            ConfigUndefined(_) | AccessDenied(_) | UnsupportedVersion(_) | PtyCreationFailed(_) => {
                None
            }
        }
    }

    /// A short description suitable for a close frame's reason field
    /// (spec §4.6 allows up to 123 bytes; callers still must truncate).
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_1002() {
        assert_eq!(Error::RsvNotZero(0x40).close_code(), Some(close_code::PROTOCOL));
        assert_eq!(Error::UnknownOpcode(0x3).close_code(), Some(close_code::PROTOCOL));
    }

    #[test]
    fn utf8_error_maps_to_1007() {
        assert_eq!(Error::InvalidUtf8.close_code(), Some(close_code::DATA));
    }

    #[test]
    fn timeouts_map_to_1008() {
        assert_eq!(Error::IdleTimeout.close_code(), Some(close_code::POLICY));
        assert_eq!(Error::ReadTimeout.close_code(), Some(close_code::POLICY));
    }

    #[test]
    fn transport_errors_have_no_close_frame() {
        assert_eq!(Error::PeerEof.close_code(), None);
    }
}
