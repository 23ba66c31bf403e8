//! Component F: the Connection (spec §3, §4.6). Binds a [`crate::reader::MessageReader`]
//! and a shared [`crate::writer::MessageWriter`] to one role, one content
//! mode, and the open -> closed -> shut lifecycle spec §4.6 describes as
//! monotonic (it never reverses).
//!
//! Grounded on the teacher's `WSConnection` (the `Stream`-based poller
//! this file used to hold) for the general shape of "one struct owns the
//! split streams and answers close/ping bookkeeping inline", generalized
//! to the spec's richer attribute set (content mode, lifecycle states,
//! queued-I/O counters already living in `transport.rs`).

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::error::{close_code, Error};
use crate::frame::OpCode;
use crate::reader::{MessageReader, ReadOutcome, ReaderMessage};
use crate::scratch::generate_masking_key;
use crate::transport::{InputTransport, OutputTransport};
use crate::writer::MessageWriter;

/// Which side of the handshake this connection plays. Determines masking
/// direction (client masks outgoing, server requires masked incoming) per
/// spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// How text payloads are delivered to the caller (spec §3 "content
/// mode"). `Ascii` downcodes anything above U+00FF per `substitution`;
/// `Utf8` passes the validated UTF-8 bytes through unchanged; `Binary`
/// disables the text/UTF-8 distinction entirely (every message is an
/// opaque byte string — the original's "raw" mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    Ascii(AsciiSubstitution),
    Utf8,
    Binary,
}

/// What to do with a decoded code point above U+00FF in ASCII content
/// mode (spec §9 "the original drops the high byte" vs. a substitution
/// character — see DESIGN.md OQ-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiSubstitution {
    Drop,
    Replace(u8),
}

/// Monotonic lifecycle state (spec §4.6): `Open` -> `Closed` -> `Shut`,
/// never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open,
    Closed,
    Shut,
}

/// Wall-clock seconds since the epoch, the unit spec §3/§4.7 uses for
/// every connection timer.
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Downcodes validated UTF-8 bytes to single-byte "ASCII-extended" output
/// for `ContentMode::Ascii`. Code points <= 0xFF map to their single low
/// byte; anything above is handled per `policy`.
pub fn utf8_to_ascii(utf8: &[u8], policy: AsciiSubstitution) -> Vec<u8> {
    let mut out = Vec::with_capacity(utf8.len());
    for ch in String::from_utf8_lossy(utf8).chars() {
        let cp = ch as u32;
        if cp <= 0xFF {
            out.push(cp as u8);
        } else {
            match policy {
                AsciiSubstitution::Drop => {}
                AsciiSubstitution::Replace(byte) => out.push(byte),
            }
        }
    }
    out
}

/// Per-connection deadlines the watchdog (spec §4.7) drives, in whole
/// seconds of wall clock (0/disabled modeled as `None`, per spec §3's
/// "timers that are zero are disabled"). Kept on the Connection itself
/// because spec §3 lists them as Connection attributes, not side state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timers {
    pub read_secs: Option<u64>,
    pub idle_secs: Option<u64>,
    pub ping_secs: Option<u64>,
    pub close_secs: Option<u64>,
    pub wake_secs: Option<u64>,
    pub read_deadline: Option<u64>,
    pub idle_deadline: Option<u64>,
    pub ping_deadline: Option<u64>,
    pub close_deadline: Option<u64>,
    pub wake_deadline: Option<u64>,
    pub ping_counter: u64,
}

impl Timers {
    /// Arms the read/idle/ping/wake deadlines from their configured
    /// intervals at connection admission (spec §4.7 — deadlines start
    /// disabled until a corresponding interval is configured).
    pub fn arm(&mut self, now: u64) {
        self.read_deadline = self.read_secs.map(|s| now + s);
        self.idle_deadline = self.idle_secs.map(|s| now + s);
        self.ping_deadline = self.ping_secs.map(|s| now + s);
        self.wake_deadline = self.wake_secs.map(|s| now + s);
    }

    /// "Each completed successful read of any frame bumps read-deadline
    /// and idle-deadline forward by their respective intervals" (spec
    /// §4.7).
    pub fn bump_on_read(&mut self, now: u64) {
        self.read_deadline = self.read_secs.map(|s| now + s);
        self.idle_deadline = self.idle_secs.map(|s| now + s);
    }
}

/// Binds one framed transport to one role and content mode, and owns the
/// lifecycle state machine. `R`/`W` are the split halves of whatever byte
/// stream carries the connection (a TCP socket, a PTY's master fd via
/// [`crate::pty`], or an in-memory duplex pipe in tests).
pub struct Connection<R, W> {
    id: uuid::Uuid,
    role: Role,
    content_mode: ContentMode,
    state: LifecycleState,
    reader: MessageReader<R, W>,
    writer: Arc<Mutex<MessageWriter<W>>>,
    input_data_max: usize,
    last_activity: Instant,
    pub timers: Timers,
    on_wake: Option<Arc<dyn Fn(uuid::Uuid) + Send + Sync>>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader_half: R,
        writer_half: W,
        role: Role,
        content_mode: ContentMode,
        frame_max: Option<usize>,
        input_data_max: usize,
    ) -> Self {
        let writer =
            Arc::new(Mutex::new(MessageWriter::new(OutputTransport::new(writer_half), role, frame_max)));
        let reader =
            MessageReader::new(InputTransport::new(reader_half), writer.clone(), role, content_mode);

        Self {
            id: uuid::Uuid::new_v4(),
            role,
            content_mode,
            state: LifecycleState::Open,
            reader,
            writer,
            input_data_max,
            last_activity: Instant::now(),
            timers: Timers::default(),
            on_wake: None,
        }
    }

    /// Registers the connection's wake callback (spec §3 Connection
    /// "callbacks: ... on-wake"), invoked by the watchdog each time
    /// `timers.wake_deadline` fires (spec §4.7 step 4).
    pub fn set_on_wake(&mut self, callback: Arc<dyn Fn(uuid::Uuid) + Send + Sync>) {
        self.on_wake = Some(callback);
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content_mode(&self) -> ContentMode {
        self.content_mode
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn queued_input(&self) -> i64 {
        self.reader.queued_input()
    }

    pub async fn queued_output(&self) -> i64 {
        self.writer.lock().await.queued_output()
    }

    /// Reads the next complete message. Transparently handles ping/pong;
    /// on a peer-initiated close, writes the reciprocal close frame (if we
    /// haven't already sent one) and advances the lifecycle state, per
    /// spec §4.6's "on receiving a close frame: if not already closed,
    /// write a reciprocal close, then begin shutting down".
    pub async fn read_message(&mut self) -> Result<Option<ReaderMessage>, Error> {
        if self.state == LifecycleState::Shut {
            return Err(Error::AlreadyShut);
        }

        match self.reader.read_message(self.input_data_max).await {
            Ok(ReadOutcome::Message(msg)) => {
                self.last_activity = Instant::now();
                self.timers.bump_on_read(now_secs());
                Ok(Some(msg))
            }
            Ok(ReadOutcome::Pong(_)) => {
                self.last_activity = Instant::now();
                self.timers.bump_on_read(now_secs());
                Ok(None)
            }
            Ok(ReadOutcome::PeerClose { code: _, reason: _ }) => {
                self.last_activity = Instant::now();
                if self.state == LifecycleState::Open {
                    let _ = self.writer.lock().await.send_control(OpCode::Close, Vec::new()).await;
                }
                self.state = LifecycleState::Closed;
                Ok(None)
            }
            Err(e) => {
                // Protocol/data errors get a close frame with the matching
                // code (spec §7); transport errors go straight to shut.
                if self.state == LifecycleState::Open {
                    if let Some(code) = e.close_code() {
                        let _ = self.writer.lock().await.send_close(code, &e.reason()).await;
                    }
                }
                self.state = LifecycleState::Shut;
                Err(e)
            }
        }
    }

    /// Sends a complete text or binary message (spec §4.5). Rejected once
    /// the connection has left `Open`.
    pub async fn send_message(&mut self, opcode: OpCode, data: &[u8]) -> Result<(), Error> {
        if self.state != LifecycleState::Open {
            return Err(Error::AlreadyShut);
        }
        self.writer.lock().await.write_message(opcode, data).await
    }

    /// Sends an unsolicited ping (spec §4.7, watchdog-driven keepalive).
    pub async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        if self.state != LifecycleState::Open {
            return Err(Error::AlreadyShut);
        }
        self.writer.lock().await.send_control(OpCode::Ping, payload).await
    }

    /// Initiates a graceful close (spec §4.6): sends a close frame and
    /// moves to `Closed`. The peer's reciprocal close (observed on the
    /// next `read_message`) or a watchdog close-timeout completes the
    /// transition to `Shut`.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        if self.state != LifecycleState::Open {
            return Ok(());
        }
        self.writer.lock().await.send_close(code, reason).await?;
        self.state = LifecycleState::Closed;
        Ok(())
    }

    /// Sends the watchdog's periodic keepalive ping, payload
    /// `"<counter> <now-seconds>"` per spec §4.7/§6, and bumps the
    /// counter for next time.
    pub async fn send_watchdog_ping(&mut self, now: u64) -> Result<(), Error> {
        let counter = self.timers.ping_counter;
        self.timers.ping_counter += 1;
        self.send_ping(format!("{counter} {now}").into_bytes()).await
    }

    /// Abrupt ("bang") shutdown: no close frame, straight to `Shut` (spec
    /// §4.6, §7 "transport errors"). Used when the underlying transport
    /// has already failed.
    pub fn bang(&mut self) {
        self.state = LifecycleState::Shut;
    }

    /// Exposed so a watchdog sweep (spec §4.7) can force the final
    /// `Closed -> Shut` edge once its close-timer expires without a peer
    /// reciprocal close ever arriving.
    pub fn force_shut(&mut self) {
        self.state = LifecycleState::Shut;
    }

    /// Invokes the registered wake callback, if any (spec §4.7 step 4).
    /// A no-op when no callback has been registered.
    pub fn fire_wake(&mut self) {
        if let Some(callback) = &self.on_wake {
            callback(self.id);
        }
    }

    pub fn fresh_masking_key_for_test(&self) -> [u8; 4] {
        generate_masking_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn lifecycle_is_open_immediately_after_construction() {
        let (a, _b) = duplex(1024);
        let (r, w) = tokio::io::split(a);
        let conn = Connection::new(r, w, Role::Client, ContentMode::Utf8, None, 0);
        assert_eq!(conn.state(), LifecycleState::Open);
    }

    #[tokio::test]
    async fn close_moves_state_to_closed_not_shut() {
        let (a, _b) = duplex(1024);
        let (r, w) = tokio::io::split(a);
        let mut conn = Connection::new(r, w, Role::Server, ContentMode::Utf8, None, 0);
        conn.close(close_code::NORMAL, "bye").await.unwrap();
        assert_eq!(conn.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn bang_jumps_straight_to_shut() {
        let (a, _b) = duplex(1024);
        let (r, w) = tokio::io::split(a);
        let mut conn = Connection::new(r, w, Role::Server, ContentMode::Utf8, None, 0);
        conn.bang();
        assert_eq!(conn.state(), LifecycleState::Shut);
    }

    #[tokio::test]
    async fn peer_close_frame_advances_lifecycle_and_sends_empty_close() {
        let (a, mut b) = duplex(1024);
        let (r, w) = tokio::io::split(a);
        let mut conn = Connection::new(r, w, Role::Server, ContentMode::Utf8, None, 0);

        // Server role requires masked frames; send a masked close frame.
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let key = [1u8, 2, 3, 4];
        let payload = [0x03, 0xe8]; // code 1000
        let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect();
        let mut frame = vec![0x88, 0x80 | 2];
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&masked);
        b.write_all(&frame).await.unwrap();

        let result = conn.read_message().await.unwrap();
        assert!(result.is_none());
        // Closed, not Shut: the watchdog's close-deadline completes the
        // final edge (spec §4.6 B6).
        assert_eq!(conn.state(), LifecycleState::Closed);

        // The reciprocal close frame is empty (`88 00`), not an echo of
        // the peer's code (spec §4.6, boundary scenario B6).
        let mut echo = [0u8; 2];
        b.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, [0x88, 0x00]);
    }

    #[test]
    fn ascii_substitution_replace_policy_emits_placeholder() {
        let out = utf8_to_ascii("caf\u{e9} \u{1F600}".as_bytes(), AsciiSubstitution::Replace(b'?'));
        assert_eq!(out, b"caf\xe9 ?");
    }

    #[tokio::test]
    async fn read_after_shut_errors() {
        let (a, _b) = duplex(1024);
        let (r, w) = tokio::io::split(a);
        let mut conn = Connection::new(r, w, Role::Server, ContentMode::Utf8, None, 0);
        conn.bang();
        let err = conn.read_message().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyShut));
    }
}
