//! Component H: the Session layer (spec §4.8). Binds one
//! [`crate::connection::Connection`] to one [`crate::pty::PtyPort`] and
//! brokers bytes between them, multiplexing the in-band control escape
//! (spec §6) out of the data stream.
//!
//! No teacher analogue (the teacher has no PTY concept at all); built
//! from spec §4.8 and `examples/original_source/src/dclinabox/dclinabox.c`'s
//! `PtdReadAst`/`WsLibReadAst`/logout-detection logic, translated into the
//! `tokio::select!`-driven broker loop the teacher's own connection code
//! uses for its read/write interleaving (`read.rs`/`write.rs`).

use log::{debug, info, warn};

use crate::connection::{Connection, LifecycleState};
use crate::error::{close_code, Error};
use crate::escape::{has_magic_prefix, ControlMessage};
use crate::frame::OpCode;
use crate::pty::PtyPort;
use crate::reader::DEFAULT_CHUNK_SIZE;

use tokio::io::{AsyncRead, AsyncWrite};

/// How the shell running under this session's terminal was obtained
/// (spec §4.8 "Terminal plumbing"): directly spawned under a mapped host
/// user for SSO, or left to prompt for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOrigin {
    SingleSignOn,
    LoginPrompt,
}

/// Everything the Session Manager's periodic sweep (spec §4.8, component
/// I, `src/session_manager.rs`) needs to read or update about one
/// session's identity and idle bookkeeping, gathered in one place so it
/// doesn't need direct field access into `Session`.
pub struct SessionIdentity {
    pub http_host: String,
    pub node_name: String,
    pub remote_user: String,
    pub process_name: String,
    pub is_new: bool,
}

/// The byte-length/structural heuristic spec §4.8/§9 describes for
/// detecting a "logged out at <date> <time>" line, ported from
/// `dclinabox.c`'s `PtdReadAst`. Documented there (and here) as a
/// heuristic, not a semantic guarantee — spec §9 flags it as brittle to
/// host-locale changes.
pub fn looks_like_logout_line(line: &[u8]) -> bool {
    if line.len() != 48 && line.len() != 54 {
        return false;
    }
    let mut cptr = 0usize;
    let zptr = line.len();
    if cptr < zptr && (line[cptr] == b'\r' || line[cptr] == b'\n') {
        cptr += 1;
    }
    while cptr < zptr && line[cptr] == b' ' {
        cptr += 1;
    }
    while cptr < zptr && line[cptr] != b' ' {
        cptr += 1;
    }
    while cptr < zptr && line[cptr] == b' ' {
        cptr += 1;
    }
    if cptr != 16 || cptr + 13 > zptr {
        return false;
    }
    if &line[cptr..cptr + 13] != b"logged out at" {
        return false;
    }
    cptr += 13;
    while cptr < zptr && line[cptr] == b' ' {
        cptr += 1;
    }
    let is_digit = |b: u8| b.is_ascii_digit();
    let is_alpha = |b: u8| b.is_ascii_alphabetic();
    // dd-MMM-yyyy
    let pattern: [fn(u8) -> bool; 11] =
        [is_digit, is_digit, |b| b == b'-', is_alpha, is_alpha, is_alpha, |b| b == b'-', is_digit, is_digit, is_digit, is_digit];
    for check in pattern {
        if cptr < zptr && check(line[cptr]) {
            cptr += 1;
        }
    }
    while cptr < zptr && line[cptr] == b' ' {
        cptr += 1;
    }
    while cptr < zptr && (is_digit(line[cptr]) || line[cptr] == b':' || line[cptr] == b'.') {
        cptr += 1;
    }
    cptr == zptr - 1 && (line[cptr] == b'\r' || line[cptr] == b'\n')
}

/// How many further terminal reads the "logged out" countdown survives
/// before a subsequent keystroke resets it (spec §4.8: "set to 10").
const LOGOUT_RESPONSE_COUNTDOWN: u8 = 10;

/// Source of the local node name used in the title string (spec §4.8):
/// a trait so tests don't depend on the real hostname.
pub trait NodeInfo: Send + Sync {
    fn node_name(&self) -> String;
}

/// Queries the host's own hostname via `nix::unistd::gethostname`, the
/// Unix equivalent of the original's `$GETSYIW` node-name lookup.
pub struct HostNodeInfo;

impl NodeInfo for HostNodeInfo {
    fn node_name(&self) -> String {
        nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_default()
    }
}

/// Binds one [`Connection`] to one [`PtyPort`] and brokers bytes between
/// them (spec §4.8). `R`/`W` are the WebSocket-side transport halves;
/// the terminal side is a boxed [`PtyPort`] since a `Session` only ever
/// owns one concrete terminal implementation at a time but Sessions of
/// different transport flavors can share a [`crate::session_manager::SessionManager`]
/// sweep if monomorphized identically (see that module's doc comment).
pub struct Session<R, W> {
    connection: Connection<R, W>,
    pty: Box<dyn PtyPort>,
    origin: TerminalOrigin,
    http_host: String,
    node_name: String,
    remote_user: String,
    process_name: String,
    client_input_count: u64,
    logout_response_countdown: u8,
    alerted: bool,
    observed: bool,
    pub(crate) idle_mins: i32,
    pub(crate) warn_mins: i32,
    pub(crate) idle_deadline: Option<u64>,
    pub(crate) warn_deadline: Option<u64>,
    pub(crate) idle_baseline_input_count: u64,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        connection: Connection<R, W>,
        pty: Box<dyn PtyPort>,
        origin: TerminalOrigin,
        http_host: String,
        node_name: String,
        remote_user: String,
    ) -> Self {
        Self {
            connection,
            pty,
            origin,
            http_host,
            node_name,
            remote_user,
            process_name: String::new(),
            client_input_count: 0,
            logout_response_countdown: 0,
            alerted: false,
            observed: false,
            idle_mins: -1,
            warn_mins: -1,
            idle_deadline: None,
            warn_deadline: None,
            idle_baseline_input_count: 0,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.connection.id()
    }

    pub fn client_input_count(&self) -> u64 {
        self.client_input_count
    }

    pub fn has_been_observed(&self) -> bool {
        self.observed
    }

    pub fn mark_observed(&mut self) {
        self.observed = true;
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn set_process_name(&mut self, name: String) {
        self.process_name = name;
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            http_host: self.http_host.clone(),
            node_name: self.node_name.clone(),
            remote_user: self.remote_user.clone(),
            process_name: self.process_name.clone(),
            is_new: !self.observed,
        }
    }

    pub fn alerted(&self) -> bool {
        self.alerted
    }

    pub fn set_alerted(&mut self, alerted: bool) {
        self.alerted = alerted;
    }

    pub async fn send_escape(&mut self, message: &ControlMessage) -> Result<(), Error> {
        self.connection.send_message(OpCode::Text, &message.encode()).await
    }

    /// Whether this session's connection is still open (spec §4.8 Session
    /// Manager: closed sessions are dropped from the sweep without further
    /// processing).
    pub fn is_open(&self) -> bool {
        self.connection.state() == LifecycleState::Open
    }

    /// Delegates to the connection's close handshake (spec §4.8 Session
    /// Manager: "close the connection" on an expired idle deadline).
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        self.connection.close(code, reason).await
    }

    /// Queries the attached terminal's current host process name, if the
    /// underlying [`PtyPort`] implementation can determine one (spec §4.8
    /// "every fourth tick ... refresh the process name").
    pub fn query_process_name(&self) -> Option<String> {
        self.pty.process_name()
    }

    #[cfg(test)]
    pub(crate) fn inject_client_input_for_test(&mut self) {
        self.client_input_count += 1;
    }

    /// Performs terminal admission (spec §4.8 "Terminal plumbing"): when
    /// not SSO'd, issues one unsolicited CR to elicit the login prompt.
    pub async fn admit(&mut self) -> Result<(), Error> {
        if self.origin == TerminalOrigin::LoginPrompt {
            self.pty.write(b"\r").await?;
        }
        self.send_escape(&ControlMessage::Version(env!("CARGO_PKG_VERSION").to_string())).await?;
        info!(
            "session {} admitted (origin={:?}, user={})",
            self.id(),
            self.origin,
            self.remote_user
        );
        Ok(())
    }

    /// The byte-brokering main loop (spec §4.8 "Byte brokering"): races a
    /// terminal read against a WebSocket read, forwarding each side's
    /// bytes to the other, until the connection shuts down or the
    /// terminal exits. Returns once the session is over.
    pub async fn run(&mut self) -> Result<(), Error> {
        let mut pty_buf = vec![0u8; DEFAULT_CHUNK_SIZE];

        loop {
            if self.connection.state() != LifecycleState::Open {
                return Ok(());
            }

            tokio::select! {
                pty_result = self.pty.read(&mut pty_buf) => {
                    match pty_result {
                        Ok(0) => {
                            self.on_shell_exit().await?;
                            return Ok(());
                        }
                        Ok(n) => {
                            self.observe_logout_pattern(&pty_buf[..n]);
                            self.connection.send_message(OpCode::Text, &pty_buf[..n]).await?;
                        }
                        Err(_) => {
                            self.on_shell_exit().await?;
                            return Ok(());
                        }
                    }
                }
                ws_result = self.connection.read_message() => {
                    match ws_result {
                        Ok(Some(mut message)) => {
                            let bytes = message.grab();
                            self.handle_client_bytes(&bytes).await?;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("session {} websocket error: {e}", self.id());
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Dispatches one WebSocket-delivered chunk: an in-band control
    /// escape (resize only, inbound — spec §6) or raw keystrokes to the
    /// terminal (spec §4.8 "Byte brokering"). Any keystroke resets the
    /// logout-response countdown (spec §4.8).
    async fn handle_client_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.client_input_count += 1;
        self.logout_response_countdown = 0;

        if has_magic_prefix(bytes) {
            if let Some(ControlMessage::Resize { cols, rows }) = crate::escape::decode(bytes) {
                self.handle_resize(cols, rows).await?;
            }
            return Ok(());
        }

        self.pty.write(bytes).await
    }

    /// S1 boundary scenario: clamp to [48, 511] x [10, 255] (already done
    /// by `escape::decode`'s parse), apply the resize, and ack with the
    /// server's actual size.
    async fn handle_resize(&mut self, cols: u16, rows: u16) -> Result<(), Error> {
        self.pty.resize(cols, rows)?;
        debug!("session {} resized to {cols}x{rows}", self.id());
        self.send_escape(&ControlMessage::Resize { cols, rows }).await
    }

    fn observe_logout_pattern(&mut self, chunk: &[u8]) {
        if looks_like_logout_line(chunk) {
            self.logout_response_countdown = LOGOUT_RESPONSE_COUNTDOWN;
        } else if self.logout_response_countdown > 0 {
            self.logout_response_countdown -= 1;
        }
    }

    /// Shell process ended (spec §4.8 "Logout detection"): tell the
    /// client whether this was a clean logout (countdown still positive)
    /// or an abrupt termination, then close the connection.
    async fn on_shell_exit(&mut self) -> Result<(), Error> {
        if self.logout_response_countdown > 0 {
            self.send_escape(&ControlMessage::Logout).await?;
        } else {
            self.send_escape(&ControlMessage::Terminated).await?;
        }
        self.connection.close(close_code::NORMAL, "shell exited").await
    }
}
