//! Component G: the process-wide 1 Hz watchdog (spec §4.7). No teacher
//! analogue — the teacher has no deadline supervisor of its own — built
//! directly from spec §4.7's tick algorithm and the original's default
//! timer values (`wslib.c`: `close=5s`, `idle=120s`, `life=120s`,
//! `ping=600s`, `read=60s`, `wake=60s`), recorded as `WatchdogDefaults`.
//!
//! The source's watchdog is a single timer shared by a process-wide
//! Connection list (spec §3 "Watchdog global state"). Reimplemented here
//! as a generic `Watchdog<C>` over one [`Supervised`] connection type,
//! matching spec §9's "reimplement as an explicit scheduler object" note:
//! the process's default instance is just `Watchdog::new(..)` constructed
//! by whatever entry point owns the CGIplus event loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::connection::{now_secs, Timers};
use crate::error::{close_code, Error};

/// Global defaults for every timer class (spec §4.7, §9). All in seconds;
/// `0` disables a class the same way spec §3 treats a zero timer.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogDefaults {
    pub close_secs: u64,
    pub idle_secs: u64,
    pub life_secs: u64,
    pub ping_secs: u64,
    pub read_secs: u64,
    pub wake_secs: u64,
}

impl Default for WatchdogDefaults {
    fn default() -> Self {
        Self { close_secs: 5, idle_secs: 120, life_secs: 120, ping_secs: 600, read_secs: 60, wake_secs: 60 }
    }
}

/// What the watchdog needs from a connection-like thing to supervise it.
/// Implemented by [`crate::connection::Connection`]; kept as a trait so
/// [`Watchdog`] doesn't need to know the transport's concrete `R`/`W`.
#[async_trait]
pub trait Supervised: Send {
    fn id(&self) -> Uuid;
    fn is_open(&self) -> bool;
    fn is_closed(&self) -> bool;
    fn timers(&self) -> Timers;
    fn timers_mut(&mut self) -> &mut Timers;
    async fn send_watchdog_ping(&mut self, now: u64) -> Result<(), Error>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error>;
    fn force_shut(&mut self);
    fn fire_wake(&mut self);
}

#[async_trait]
impl<R, W> Supervised for crate::connection::Connection<R, W>
where
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    fn id(&self) -> Uuid {
        self.id()
    }

    fn is_open(&self) -> bool {
        self.state() == crate::connection::LifecycleState::Open
    }

    fn is_closed(&self) -> bool {
        self.state() == crate::connection::LifecycleState::Closed
    }

    fn timers(&self) -> Timers {
        self.timers
    }

    fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    async fn send_watchdog_ping(&mut self, now: u64) -> Result<(), Error> {
        crate::connection::Connection::send_watchdog_ping(self, now).await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        crate::connection::Connection::close(self, code, reason).await
    }

    fn force_shut(&mut self) {
        crate::connection::Connection::force_shut(self)
    }

    fn fire_wake(&mut self) {
        crate::connection::Connection::fire_wake(self)
    }
}

/// What the 1 Hz tick did, for logging/testing (spec §4.7 describes these
/// as side-effects, not return values; surfaced here so callers and tests
/// can observe without re-deriving state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    ClosedForReadTimeout(Uuid),
    ClosedForIdleTimeout(Uuid),
    Pinged(Uuid),
    Woken(Uuid),
    ForceShut(Uuid),
    GlobalWake,
    ProcessShouldExit,
}

/// The process-wide watchdog (spec §4.7, §3 "Watchdog global state").
/// Generic over one [`Supervised`] connection type — the original's
/// single CGIplus process only ever supervises one transport flavor at a
/// time, so this mirrors that rather than reaching for a `dyn Trait`
/// object for no behavioral gain.
pub struct Watchdog<C> {
    defaults: WatchdogDefaults,
    connections: HashMap<Uuid, Arc<Mutex<C>>>,
    exit_deadline: Option<u64>,
    wake_global_deadline: Option<u64>,
}

impl<C: Supervised> Watchdog<C> {
    pub fn new(defaults: WatchdogDefaults) -> Self {
        Self { defaults, connections: HashMap::new(), exit_deadline: None, wake_global_deadline: None }
    }

    /// Inserts a newly admitted connection (spec §3: "Connection is
    /// inserted on create"), arming its read/idle/ping deadlines from the
    /// watchdog's defaults unless the connection already configured its
    /// own (spec §4.7's "or global default").
    pub async fn register(&mut self, id: Uuid, conn: Arc<Mutex<C>>) {
        {
            let mut guard = conn.lock().await;
            let timers = guard.timers_mut();
            let now = now_secs();
            if timers.read_secs.is_none() {
                timers.read_secs = Some(self.defaults.read_secs);
            }
            if timers.idle_secs.is_none() {
                timers.idle_secs = Some(self.defaults.idle_secs);
            }
            if timers.ping_secs.is_none() {
                timers.ping_secs = Some(self.defaults.ping_secs);
            }
            if timers.wake_secs.is_none() {
                timers.wake_secs = Some(self.defaults.wake_secs);
            }
            timers.arm(now);
        }
        self.connections.insert(id, conn);
    }

    /// Removes a connection once it reaches `shut` (spec §3: "removed on
    /// shut").
    pub fn unregister(&mut self, id: Uuid) {
        self.connections.remove(&id);
    }

    pub fn live_count(&self) -> usize {
        self.connections.len()
    }

    /// Arms a global wake deadline (spec §4.7 step 3).
    pub fn arm_global_wake(&mut self, now: u64) {
        self.wake_global_deadline = Some(now + self.defaults.wake_secs);
    }

    /// Runs one 1 Hz tick (spec §4.7). Returns every action taken this
    /// tick so the caller (an entry point, or a test) can log/assert them;
    /// the watchdog itself never panics or exits the process — a
    /// `ProcessShouldExit` action is the caller's cue to do so.
    pub async fn tick(&mut self) -> Vec<WatchdogAction> {
        let now = now_secs();
        let mut actions = Vec::new();

        if self.connections.is_empty() {
            let deadline = *self.exit_deadline.get_or_insert(now + self.defaults.life_secs);
            if now >= deadline {
                actions.push(WatchdogAction::ProcessShouldExit);
            }
        } else {
            self.exit_deadline = None;
        }

        if let Some(deadline) = self.wake_global_deadline {
            if now >= deadline {
                actions.push(WatchdogAction::GlobalWake);
                self.wake_global_deadline = Some(deadline + self.defaults.wake_secs - 1);
            }
        }

        let mut to_unregister = Vec::new();
        for (&id, conn) in self.connections.iter() {
            let mut guard = conn.lock().await;
            if let Some(action) = self.step_one(id, &mut *guard, now).await {
                if action == WatchdogAction::ForceShut(id) {
                    to_unregister.push(id);
                }
                actions.push(action);
            }
        }
        for id in to_unregister {
            self.connections.remove(&id);
        }

        actions
    }

    async fn step_one(&self, id: Uuid, conn: &mut C, now: u64) -> Option<WatchdogAction> {
        // spec §4.7 step 4, in the prescribed priority order (an `else
        // if` chain: at most one action fires per connection per tick).
        if conn.is_closed() {
            if conn.timers().close_deadline.is_none() {
                let close_secs = conn.timers().close_secs.unwrap_or(self.defaults.close_secs);
                conn.timers_mut().close_deadline = Some(now + close_secs);
            }
            let deadline = conn.timers().close_deadline.expect("just armed above");
            if now >= deadline {
                conn.force_shut();
                return Some(WatchdogAction::ForceShut(id));
            }
            return None;
        }

        if !conn.is_open() {
            return None;
        }

        if let Some(deadline) = conn.timers().read_deadline {
            if now >= deadline {
                let _ = conn.close(close_code::POLICY, "read wait exceeded").await;
                return Some(WatchdogAction::ClosedForReadTimeout(id));
            }
        }
        if let Some(deadline) = conn.timers().idle_deadline {
            if now >= deadline {
                let _ = conn.close(close_code::POLICY, "idle connection").await;
                return Some(WatchdogAction::ClosedForIdleTimeout(id));
            }
        }
        if let Some(deadline) = conn.timers().ping_deadline {
            if now >= deadline {
                let _ = conn.send_watchdog_ping(now).await;
                let ping_secs = conn.timers().ping_secs.unwrap_or(self.defaults.ping_secs);
                conn.timers_mut().ping_deadline = Some(deadline + ping_secs - 1);
                return Some(WatchdogAction::Pinged(id));
            }
        }
        if let Some(deadline) = conn.timers().wake_deadline {
            if now >= deadline {
                conn.fire_wake();
                let wake_secs = conn.timers().wake_secs.unwrap_or(self.defaults.wake_secs);
                conn.timers_mut().wake_deadline = Some(deadline + wake_secs - 1);
                return Some(WatchdogAction::Woken(id));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ContentMode, Role};
    use tokio::io::duplex;

    type TestConn = Connection<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>;

    async fn make_connection() -> TestConn {
        let (a, _b) = duplex(1024);
        let (r, w) = tokio::io::split(a);
        Connection::new(r, w, Role::Server, ContentMode::Utf8, None, 0)
    }

    #[tokio::test]
    async fn b8_empty_connection_list_schedules_process_exit_after_life_secs() {
        let defaults = WatchdogDefaults { life_secs: 0, ..WatchdogDefaults::default() };
        let mut watchdog: Watchdog<TestConn> = Watchdog::new(defaults);
        let actions = watchdog.tick().await;
        assert!(actions.contains(&WatchdogAction::ProcessShouldExit));
    }

    #[tokio::test]
    async fn registering_a_connection_clears_the_exit_deadline() {
        let mut watchdog: Watchdog<TestConn> = Watchdog::new(WatchdogDefaults::default());
        let _ = watchdog.tick().await; // arms exit_deadline
        let conn = Arc::new(Mutex::new(make_connection().await));
        watchdog.register(Uuid::new_v4(), conn).await;
        let actions = watchdog.tick().await;
        assert!(!actions.contains(&WatchdogAction::ProcessShouldExit));
    }

    #[tokio::test]
    async fn closed_connection_is_force_shut_after_close_secs() {
        let defaults = WatchdogDefaults { close_secs: 0, ..WatchdogDefaults::default() };
        let mut watchdog: Watchdog<TestConn> = Watchdog::new(defaults);
        let mut conn = make_connection().await;
        conn.close(close_code::NORMAL, "bye").await.unwrap();
        let id = conn.id();
        watchdog.register(id, Arc::new(Mutex::new(conn))).await;

        let actions = watchdog.tick().await;
        assert!(actions.contains(&WatchdogAction::ForceShut(id)));
        assert_eq!(watchdog.live_count(), 0);
    }

    #[tokio::test]
    async fn b8_idle_connection_is_closed_once_idle_deadline_passes() {
        let mut watchdog: Watchdog<TestConn> = Watchdog::new(WatchdogDefaults::default());
        let mut conn = make_connection().await;
        conn.timers.idle_secs = Some(2);
        let id = conn.id();
        let conn = Arc::new(Mutex::new(conn));
        watchdog.register(id, conn.clone()).await;

        // Simulate the 3-second idle gap from boundary scenario B8 by
        // back-dating the deadline rather than sleeping in a unit test.
        conn.lock().await.timers_mut().idle_deadline = Some(now_secs().saturating_sub(1));

        let actions = watchdog.tick().await;
        assert!(actions.contains(&WatchdogAction::ClosedForIdleTimeout(id)));
        assert_eq!(conn.lock().await.state(), crate::connection::LifecycleState::Closed);
    }

    #[tokio::test]
    async fn ping_deadline_rearms_after_firing() {
        let mut watchdog: Watchdog<TestConn> = Watchdog::new(WatchdogDefaults::default());
        let mut conn = make_connection().await;
        conn.timers.ping_secs = Some(600);
        let id = conn.id();
        let conn = Arc::new(Mutex::new(conn));
        watchdog.register(id, conn.clone()).await;
        conn.lock().await.timers_mut().ping_deadline = Some(now_secs().saturating_sub(1));

        let actions = watchdog.tick().await;
        assert!(actions.contains(&WatchdogAction::Pinged(id)));
        assert!(conn.lock().await.timers().ping_deadline.unwrap() > now_secs());
    }

    #[tokio::test]
    async fn wake_deadline_fires_callback_and_rearms() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut watchdog: Watchdog<TestConn> = Watchdog::new(WatchdogDefaults::default());
        let mut conn = make_connection().await;
        conn.timers.wake_secs = Some(600);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = fired.clone();
        conn.set_on_wake(Arc::new(move |_id| {
            fired_in_callback.fetch_add(1, Ordering::SeqCst);
        }));
        let id = conn.id();
        let conn = Arc::new(Mutex::new(conn));
        watchdog.register(id, conn.clone()).await;
        conn.lock().await.timers_mut().wake_deadline = Some(now_secs().saturating_sub(1));

        let actions = watchdog.tick().await;
        assert!(actions.contains(&WatchdogAction::Woken(id)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(conn.lock().await.timers().wake_deadline.unwrap() > now_secs());
    }

    #[tokio::test]
    async fn global_wake_rearms_after_firing() {
        let mut watchdog: Watchdog<TestConn> = Watchdog::new(WatchdogDefaults::default());
        watchdog.arm_global_wake(now_secs().saturating_sub(1));
        let actions = watchdog.tick().await;
        assert!(actions.contains(&WatchdogAction::GlobalWake));
        assert!(watchdog.wake_global_deadline.unwrap() > now_secs());
    }
}
