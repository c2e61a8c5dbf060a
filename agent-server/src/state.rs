//! Shared application state: the agent and the per-session trace bus.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use agent::io::trace::{TraceEvent, TraceSink};
use agent::orchestrator::Agent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Events kept per session for subscribers that connect late.
pub const BACKLOG_LIMIT: usize = 256;

/// Unsubscribed sessions are dropped after this long without activity.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(600);

const CHANNEL_CAPACITY: usize = 64;

/// Body of `POST /trace/push`. `kind` is free-form; it becomes the SSE event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushedEvent {
    pub session_id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl From<&TraceEvent> for PushedEvent {
    fn from(event: &TraceEvent) -> Self {
        Self {
            session_id: event.session_id.clone(),
            kind: event.kind.as_str().to_string(),
            payload: event.payload.clone(),
            timestamp: Some(event.timestamp.clone()),
        }
    }
}

struct SessionChannel {
    backlog: VecDeque<PushedEvent>,
    tx: broadcast::Sender<PushedEvent>,
    last_activity: Instant,
}

impl SessionChannel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            backlog: VecDeque::new(),
            tx,
            last_activity: Instant::now(),
        }
    }

    fn is_stale(&self, now: Instant, idle_ttl: Duration) -> bool {
        self.tx.receiver_count() == 0 && now.duration_since(self.last_activity) >= idle_ttl
    }
}

/// Fan-out of pushed trace events to per-session SSE subscribers.
///
/// A session is dropped when its last subscriber disconnects, or, if nobody
/// is subscribed, once it has been idle for `idle_ttl`.
pub struct TraceBus {
    sessions: Mutex<HashMap<String, SessionChannel>>,
    idle_ttl: Duration,
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::with_idle_ttl(SESSION_IDLE_TTL)
    }
}

impl TraceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Record `event` in its session backlog and forward it to live subscribers.
    pub fn publish(&self, event: PushedEvent) {
        let mut sessions = self.lock();
        let channel = self.channel(&mut sessions, &event.session_id);
        if channel.backlog.len() == BACKLOG_LIMIT {
            channel.backlog.pop_front();
        }
        channel.backlog.push_back(event.clone());
        let receivers = channel.tx.send(event).unwrap_or(0);
        debug!(receivers, "trace event published");
    }

    /// Snapshot the backlog and subscribe to later events.
    ///
    /// Both happen under one lock, so no event is missed or seen twice.
    pub fn subscribe(self: &Arc<Self>, session_id: &str) -> Subscription {
        let mut sessions = self.lock();
        let channel = self.channel(&mut sessions, session_id);
        let backlog = channel.backlog.iter().cloned().collect();
        let rx = channel.tx.subscribe();
        debug!(sessions = sessions.len(), "trace subscriber added");
        Subscription {
            bus: Arc::clone(self),
            session_id: session_id.to_string(),
            backlog,
            rx: Some(rx),
        }
    }

    /// Sessions currently held (live or within their idle window).
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Look up `session_id`, creating it (and pruning stale sessions) if absent.
    fn channel<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionChannel>,
        session_id: &str,
    ) -> &'a mut SessionChannel {
        let now = Instant::now();
        if !sessions.contains_key(session_id) {
            let before = sessions.len();
            sessions.retain(|_, channel| !channel.is_stale(now, self.idle_ttl));
            if sessions.len() < before {
                debug!(pruned = before - sessions.len(), "idle trace sessions dropped");
            }
        }
        let channel = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionChannel::new);
        channel.last_activity = now;
        channel
    }

    /// Forget `session_id` once no subscriber is left.
    fn release(&self, session_id: &str) {
        let mut sessions = self.lock();
        let idle = sessions
            .get(session_id)
            .is_some_and(|channel| channel.tx.receiver_count() == 0);
        if idle {
            sessions.remove(session_id);
            debug!(session_id, "trace session released");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionChannel>> {
        // A panic while holding the lock leaves the map itself intact.
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// One subscriber's view of a session: the replayed backlog plus live events.
///
/// Dropping the last subscription of a session removes the session.
pub struct Subscription {
    bus: Arc<TraceBus>,
    session_id: String,
    pub backlog: Vec<PushedEvent>,
    rx: Option<broadcast::Receiver<PushedEvent>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<PushedEvent, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before the count is checked.
        self.rx.take();
        self.bus.release(&self.session_id);
    }
}

/// Delivers the in-process agent's trace straight onto the bus.
#[async_trait]
impl TraceSink for TraceBus {
    async fn push(&self, _base: &str, event: &TraceEvent) {
        self.publish(PushedEvent::from(event));
    }
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub bus: Arc<TraceBus>,
    /// Outer ceiling for one `/api/agent` cycle.
    pub cycle_timeout: Duration,
}

impl AppState {
    pub fn new(agent: Agent, bus: Arc<TraceBus>) -> Self {
        let cycle_timeout = agent.config().cycle_timeout();
        Self {
            agent: Arc::new(agent),
            bus,
            cycle_timeout,
        }
    }
}
