//! Component I: the Session Manager (spec §4.8 "Session Manager periodic
//! pass"). Owns the live set of [`Session`]s and, on a roughly-15-second
//! external tick, refreshes terminal titles, reloads the idle/alert
//! configuration, and enforces per-session idle and warn deadlines.
//!
//! No teacher analogue (the teacher never tracked session-level identity
//! or idle policy at all); grounded directly on
//! `examples/original_source/src/dclinabox/dclinabox.c`'s
//! `SessionManagement()`, which runs this same sweep every 15 seconds and
//! does its once-a-minute bookkeeping on every fourth pass. The sweep
//! shape — loop over a live collection, skip what's already gone, act on
//! what remains — follows the same pattern [`crate::watchdog::Watchdog::tick`]
//! uses for connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, IdleConfig};
use crate::connection::now_secs;
use crate::error::close_code;
use crate::escape::ControlMessage;
use crate::session::{Session, SessionIdentity};

/// How often the host driving this crate is expected to call
/// [`SessionManager::sweep`] (spec §4.8: "roughly every 15 seconds").
pub const SWEEP_INTERVAL_SECS: u64 = 15;

/// Sweeps between each once-a-minute task (config reload, process-name
/// refresh): four 15-second sweeps make a minute, mirroring the
/// original's `WaitForIt` countdown.
const MINUTE_TICKS: u8 = 4;

/// Formats the terminal title string spec §4.8 specifies:
/// `DCLinabox: <http-host> <node>:: <user> ["<process-name>"]`, the
/// trailing process name omitted when unknown.
fn title_for(identity: &SessionIdentity) -> String {
    let mut title =
        format!("DCLinabox: {} {}:: {}", identity.http_host, identity.node_name, identity.remote_user);
    if !identity.process_name.is_empty() {
        title.push_str(&format!(" \"{}\"", identity.process_name));
    }
    title
}

fn idle_deadlines(idle: IdleConfig, now: u64) -> (Option<u64>, Option<u64>) {
    if idle.idle_mins < 0 {
        return (None, None);
    }
    let idle_secs = idle.idle_mins as u64 * 60;
    let warn_secs = idle.warn_mins.max(0) as u64 * 60;
    let idle_deadline = now + idle_secs;
    let warn_deadline = if idle.warn_mins < 0 || warn_secs > idle_secs {
        None
    } else {
        Some(idle_deadline - warn_secs)
    };
    (Some(idle_deadline), warn_deadline)
}

/// Owns every live [`Session`] the gateway process is currently brokering
/// and drives the periodic housekeeping pass spec §4.8 describes. `R`/`W`
/// are shared across every session the manager tracks, matching
/// [`crate::watchdog::Watchdog`]'s generic-over-one-concrete-transport
/// shape; a process juggling more than one transport flavor runs one
/// `SessionManager` per flavor.
pub struct SessionManager<R, W> {
    sessions: HashMap<Uuid, Arc<Mutex<Session<R, W>>>>,
    tick: u8,
    cached_idle: IdleConfig,
    cached_warn_message: String,
    cached_alert: Option<String>,
}

impl<R, W> Default for SessionManager<R, W> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            tick: 0,
            cached_idle: IdleConfig::default(),
            cached_warn_message: "Your session will be disconnected in %d minutes".to_string(),
            cached_alert: None,
        }
    }
}

impl<R, W> SessionManager<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: Uuid, session: Arc<Mutex<Session<R, W>>>) {
        self.sessions.insert(id, session);
    }

    pub fn unregister(&mut self, id: Uuid) {
        self.sessions.remove(&id);
    }

    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    /// Runs one periodic pass (spec §4.8). Reloads idle/alert
    /// configuration on every fourth call, refreshes titles and process
    /// names, and enforces idle/warn deadlines. Sessions whose connection
    /// has already left `Open` are dropped from the set without further
    /// processing.
    pub async fn sweep(&mut self, config: &Config<'_>) {
        let now = now_secs();
        let is_minute_tick = self.tick == 0;
        self.tick = (self.tick + 1) % MINUTE_TICKS;

        if is_minute_tick {
            let alert = config.alert();
            if alert != self.cached_alert {
                self.cached_alert = alert;
                for session in self.sessions.values() {
                    let mut session = session.lock().await;
                    if session.has_been_observed() {
                        session.set_alerted(false);
                    }
                }
            }

            let (idle, warn_message) = config.idle();
            if idle != self.cached_idle {
                self.cached_idle = idle;
                self.cached_warn_message = warn_message;
                for session in self.sessions.values() {
                    let mut session = session.lock().await;
                    let (idle_deadline, warn_deadline) = idle_deadlines(idle, now);
                    session.idle_mins = idle.idle_mins;
                    session.warn_mins = idle.warn_mins;
                    session.idle_deadline = idle_deadline;
                    session.warn_deadline = warn_deadline;
                    session.idle_baseline_input_count = session.client_input_count();
                }
            }
        }

        let mut gone = Vec::new();

        for (&id, session) in self.sessions.iter() {
            let mut session = session.lock().await;

            if !session.is_open() {
                gone.push(id);
                continue;
            }

            if !session.has_been_observed() {
                let _ = session.send_escape(&ControlMessage::Title(title_for(&session.identity()))).await;
                session.mark_observed();
            } else if is_minute_tick {
                if let Some(name) = session.query_process_name() {
                    if name != session.process_name() {
                        session.set_process_name(name);
                        let _ =
                            session.send_escape(&ControlMessage::Title(title_for(&session.identity()))).await;
                    }
                }
            }

            if session.client_input_count() > session.idle_baseline_input_count {
                let (idle_deadline, warn_deadline) = idle_deadlines(
                    IdleConfig { idle_mins: session.idle_mins, warn_mins: session.warn_mins },
                    now,
                );
                session.idle_deadline = idle_deadline;
                session.warn_deadline = warn_deadline;
                session.idle_baseline_input_count = session.client_input_count();
            }

            if let Some(deadline) = session.idle_deadline {
                if now >= deadline {
                    let _ = session.close(close_code::NORMAL, "idle timeout").await;
                    gone.push(id);
                    continue;
                }
            }

            if let Some(warn_deadline) = session.warn_deadline {
                if now >= warn_deadline {
                    let message = self.cached_warn_message.replacen("%d", &session.warn_mins.to_string(), 1);
                    let _ = session.send_escape(&ControlMessage::Alert(message)).await;
                    session.warn_deadline = None;
                }
            }

            if let Some(alert) = &self.cached_alert {
                if !session.alerted() {
                    let _ = session.send_escape(&ControlMessage::Alert(alert.clone())).await;
                    session.set_alerted(true);
                }
            }
        }

        for id in gone {
            self.sessions.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::connection::{Connection, ContentMode, Role};
    use crate::pty::FakePty;
    use crate::session::TerminalOrigin;
    use std::collections::VecDeque;
    use std::collections::HashMap as StdHashMap;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

    struct MapSource(StdHashMap<String, String>);
    impl ConfigSource for MapSource {
        fn lookup(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }
        fn lookup_multi(&self, _name: &str) -> Vec<String> {
            Vec::new()
        }
    }

    type TestSession = Session<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn new_session(user: &str) -> (Arc<Mutex<TestSession>>, DuplexStream) {
        let (a, b) = duplex(4096);
        let (r, w) = tokio::io::split(a);
        let connection = Connection::new(r, w, Role::Server, ContentMode::Utf8, None, 0);
        let pty = Box::new(FakePty {
            to_read: VecDeque::new(),
            written: Vec::new(),
            last_resize: None,
            fake_process_name: None,
        });
        let session = Session::new(
            connection,
            pty,
            TerminalOrigin::LoginPrompt,
            "example.org".to_string(),
            "NODE1".to_string(),
            user.to_string(),
        );
        (Arc::new(Mutex::new(session)), b)
    }

    #[tokio::test]
    async fn first_sweep_announces_title_for_a_new_session() {
        let mut manager: SessionManager<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> =
            SessionManager::new();
        let (session, mut client) = new_session("alice");
        let id = session.lock().await.id();
        manager.register(id, session.clone());

        let map = StdHashMap::new();
        let source = MapSource(map);
        let config = Config::new(&source, "GW");
        manager.sweep(&config).await;

        assert!(session.lock().await.has_been_observed());

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let decoded = crate::escape::decode(&buf[2..n]);
        assert!(matches!(decoded, Some(ControlMessage::Title(t)) if t == "DCLinabox: example.org NODE1:: alice"));
    }

    #[tokio::test]
    async fn idle_deadline_closes_session_once_passed() {
        let mut manager: SessionManager<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> =
            SessionManager::new();
        let (session, _client) = new_session("bob");
        let id = session.lock().await.id();
        manager.register(id, session.clone());

        let mut map = StdHashMap::new();
        map.insert("GW_IDLE".to_string(), "0,0,warn".to_string());
        let source = MapSource(map);
        let config = Config::new(&source, "GW");

        // First sweep is a "minute tick" (tick starts at 0): loads the
        // zero-minute idle config and, since idle_mins=0, sets the
        // deadline to "now" -- already passed by the time of the very
        // next sweep.
        manager.sweep(&config).await;
        manager.sweep(&config).await;

        assert!(!session.lock().await.is_open());
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn client_activity_pushes_the_idle_deadline_forward() {
        let mut manager: SessionManager<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> =
            SessionManager::new();
        let (session, _client) = new_session("carol");
        let id = session.lock().await.id();
        manager.register(id, session.clone());

        let mut map = StdHashMap::new();
        map.insert("GW_IDLE".to_string(), "60,5,warn".to_string());
        let source = MapSource(map);
        let config = Config::new(&source, "GW");

        manager.sweep(&config).await;
        let deadline_before = session.lock().await.idle_deadline.unwrap();

        session.lock().await.inject_client_input_for_test();

        manager.sweep(&config).await;
        let deadline_after = session.lock().await.idle_deadline.unwrap();
        assert!(deadline_after >= deadline_before);
        assert!(session.lock().await.is_open());
    }

    #[tokio::test]
    async fn un_alerted_session_receives_the_broadcast_alert() {
        let mut manager: SessionManager<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> =
            SessionManager::new();
        let (session, mut client) = new_session("dave");
        let id = session.lock().await.id();
        manager.register(id, session.clone());
        session.lock().await.mark_observed();

        let mut map = StdHashMap::new();
        map.insert("GW_ALERT".to_string(), "server restarting soon".to_string());
        let source = MapSource(map);
        let config = Config::new(&source, "GW");
        manager.sweep(&config).await;

        assert!(session.lock().await.alerted());

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let decoded = crate::escape::decode(&buf[2..n]);
        assert!(matches!(decoded, Some(ControlMessage::Alert(a)) if a == "server restarting soon"));
    }
}
