//! MCP session management.
//!
//! Sessions are identified by random UUIDs assigned on `initialize`. Every
//! response produced for a session is appended to that session's event log,
//! which backs its SSE stream and lets a reconnecting client resume from the
//! last event id it saw.
//!
//! Locking: the store table sits behind an async `RwLock`, each session's
//! mutable state behind its own synchronous mutex. The session mutex is never
//! held across an await point.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier of an event in a session's log. Ids start at 1.
pub type EventId = u64;

/// Errors returned by session store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} already has an attached stream")]
    Busy(String),

    /// The requested resume point has been pruned from the log.
    #[error("Events after {last_event_id} are no longer available")]
    HistoryLost {
        last_event_id: EventId,
        first_available: Option<EventId>,
    },

    #[error("Unknown event id: {0}")]
    UnknownEventId(EventId),
}

/// How long events stay in a session's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Hard cap on retained events per session.
    pub max_events: usize,
    /// Events younger than this are kept unless the cap is exceeded.
    pub resume_window: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_events: 1000,
            resume_window: Duration::from_secs(300),
        }
    }
}

/// An entry in a session's event log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub payload: Value,
    recorded_at: Instant,
}

#[derive(Debug, Default)]
struct EventLog {
    events: VecDeque<StoredEvent>,
    last_id: EventId,
    /// Highest id removed by pruning; 0 when nothing was pruned.
    pruned_through: EventId,
}

impl EventLog {
    fn append(&mut self, payload: Value, now: Instant) -> StoredEvent {
        self.last_id += 1;
        let event = StoredEvent {
            id: self.last_id,
            payload,
            recorded_at: now,
        };
        self.events.push_back(event.clone());
        event
    }

    fn prune(&mut self, policy: &RetentionPolicy, now: Instant) -> usize {
        let mut pruned = 0;
        while let Some(front) = self.events.front() {
            let expired = now.saturating_duration_since(front.recorded_at) > policy.resume_window;
            if !expired && self.events.len() <= policy.max_events {
                break;
            }
            self.pruned_through = front.id;
            self.events.pop_front();
            pruned += 1;
        }
        pruned
    }

    /// Events strictly after `cursor`, or the whole retained log when no
    /// cursor is given.
    fn after(&self, cursor: Option<EventId>) -> Result<Vec<StoredEvent>, SessionError> {
        let Some(cursor) = cursor else {
            return Ok(self.events.iter().cloned().collect());
        };
        if cursor > self.last_id {
            return Err(SessionError::UnknownEventId(cursor));
        }
        if cursor < self.pruned_through {
            return Err(SessionError::HistoryLost {
                last_event_id: cursor,
                first_available: self.events.front().map(|e| e.id),
            });
        }
        Ok(self
            .events
            .iter()
            .filter(|e| e.id > cursor)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Detached,
    Attached { generation: u64 },
}

#[derive(Debug)]
struct SessionState {
    last_activity: Instant,
    log: EventLog,
    stream: StreamState,
    next_generation: u64,
    closed: bool,
}

enum LivePoll {
    Events(Vec<StoredEvent>),
    Idle,
    Closed(CloseReason),
}

/// A single MCP session.
pub struct Session {
    id: String,
    protocol_version: String,
    created_at: Instant,
    retention: RetentionPolicy,
    state: Mutex<SessionState>,
    wakeup: Notify,
    closed: CancellationToken,
}

impl Session {
    fn new(protocol_version: &str, retention: RetentionPolicy) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            protocol_version: protocol_version.to_string(),
            created_at: now,
            retention,
            state: Mutex::new(SessionState {
                last_activity: now,
                log: EventLog::default(),
                stream: StreamState::Detached,
                next_generation: 1,
                closed: false,
            }),
            wakeup: Notify::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol version negotiated during `initialize`.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.state.lock().last_activity
    }

    /// Time since the last recorded activity, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Check if a stream consumer is currently attached.
    pub fn is_attached(&self) -> bool {
        matches!(self.state.lock().stream, StreamState::Attached { .. })
    }

    /// Record activity, postponing idle eviction.
    pub fn touch(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now > state.last_activity {
            state.last_activity = now;
        }
    }

    /// Append a payload to the event log and wake the attached stream.
    pub fn append(&self, payload: Value) -> Result<StoredEvent, SessionError> {
        let event = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SessionError::NotFound(self.id.clone()));
            }
            let now = Instant::now();
            state.last_activity = now;
            let event = state.log.append(payload, now);
            state.log.prune(&self.retention, now);
            event
        };
        self.wakeup.notify_waiters();
        Ok(event)
    }

    /// Retained events after `last_event_id`.
    pub fn events_after(
        &self,
        last_event_id: Option<EventId>,
    ) -> Result<Vec<StoredEvent>, SessionError> {
        self.state.lock().log.after(last_event_id)
    }

    fn attach(
        self: &Arc<Self>,
        last_event_id: Option<EventId>,
    ) -> Result<StreamHandle, SessionError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        if matches!(state.stream, StreamState::Attached { .. }) {
            return Err(SessionError::Busy(self.id.clone()));
        }
        let replay = state.log.after(last_event_id)?;

        let generation = state.next_generation;
        state.next_generation += 1;
        state.stream = StreamState::Attached { generation };
        state.last_activity = Instant::now();

        Ok(StreamHandle {
            session: Arc::clone(self),
            generation,
            cursor: state.log.last_id,
            pending: replay.into(),
            finished: false,
        })
    }

    /// Release the stream slot. Idempotent.
    ///
    /// A consumer still holding a handle for the released slot ends with
    /// [`CloseReason::Superseded`] on its next read.
    pub fn detach(&self) {
        let released = {
            let mut state = self.state.lock();
            let attached = matches!(state.stream, StreamState::Attached { .. });
            state.stream = StreamState::Detached;
            attached
        };
        if released {
            self.wakeup.notify_waiters();
        }
    }

    fn detach_generation(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.stream == (StreamState::Attached { generation }) {
            state.stream = StreamState::Detached;
        }
    }

    /// Mark the session closed and drop its log. Returns false if it was
    /// already closed.
    fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.stream = StreamState::Detached;
            state.log.events.clear();
        }
        self.closed.cancel();
        true
    }

    fn prune_expired(&self, now: Instant) -> usize {
        self.state.lock().log.prune(&self.retention, now)
    }

    fn poll_live(&self, generation: u64, cursor: EventId) -> LivePoll {
        let state = self.state.lock();
        if state.closed {
            return LivePoll::Closed(CloseReason::SessionClosed);
        }
        if state.stream != (StreamState::Attached { generation }) {
            return LivePoll::Closed(CloseReason::Superseded);
        }
        match state.log.after(Some(cursor)) {
            Ok(events) if events.is_empty() => LivePoll::Idle,
            Ok(events) => LivePoll::Events(events),
            Err(_) => LivePoll::Closed(CloseReason::Lagged),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session was evicted or the server is shutting down.
    SessionClosed,
    /// The stream slot was released and possibly taken by another consumer.
    Superseded,
    /// The consumer fell behind the retained log.
    Lagged,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::SessionClosed => "session_closed",
            CloseReason::Superseded => "superseded",
            CloseReason::Lagged => "lagged",
        }
    }
}

/// Item yielded by [`StreamHandle::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(StoredEvent),
    /// Terminal item; the handle yields nothing afterwards.
    Closed(CloseReason),
}

/// Exclusive reader of a session's event log.
///
/// Yields the replay computed at attach time, then live events in id order.
/// Dropping the handle releases the session's stream slot.
pub struct StreamHandle {
    session: Arc<Session>,
    generation: u64,
    cursor: EventId,
    pending: VecDeque<StoredEvent>,
    finished: bool,
}

impl StreamHandle {
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Next event, waiting for one to be appended if necessary.
    ///
    /// Returns `None` once a [`StreamItem::Closed`] has been yielded.
    pub async fn next(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }

        loop {
            if let Some(event) = self.pending.pop_front() {
                self.session.touch();
                return Some(StreamItem::Event(event));
            }

            let notified = self.session.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.session.poll_live(self.generation, self.cursor) {
                LivePoll::Events(events) => {
                    if let Some(last) = events.last() {
                        self.cursor = last.id;
                    }
                    self.pending.extend(events);
                    continue;
                }
                LivePoll::Closed(reason) => {
                    debug!(
                        "Stream for session {} ended: {}",
                        self.session.id(),
                        reason.as_str()
                    );
                    self.finished = true;
                    return Some(StreamItem::Closed(reason));
                }
                LivePoll::Idle => {}
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.session.closed.cancelled() => {}
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.session.detach_generation(self.generation);
    }
}

/// Store of all live sessions.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    retention: RetentionPolicy,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Create a session bound to the negotiated protocol version.
    pub async fn create(&self, protocol_version: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(protocol_version, self.retention));
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), Arc::clone(&session));
        info!(
            "Created MCP session: {} (protocol {})",
            session.id, protocol_version
        );
        session
    }

    /// Get a session by ID.
    pub async fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Check if a session exists.
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Record activity on a session.
    pub async fn touch(&self, id: &str) -> Result<(), SessionError> {
        self.get(id).await?.touch();
        Ok(())
    }

    /// Append a payload to a session's event log.
    pub async fn append(&self, id: &str, payload: Value) -> Result<StoredEvent, SessionError> {
        self.get(id).await?.append(payload)
    }

    /// Attach the single stream consumer of a session.
    ///
    /// With `last_event_id` the handle replays the events after it, without
    /// it the whole retained log.
    pub async fn attach_stream(
        &self,
        id: &str,
        last_event_id: Option<EventId>,
    ) -> Result<StreamHandle, SessionError> {
        self.get(id).await?.attach(last_event_id)
    }

    /// Release a session's stream slot. Unknown sessions are ignored.
    pub async fn detach_stream(&self, id: &str) {
        if let Ok(session) = self.get(id).await {
            session.detach();
        }
    }

    /// Remove and close a session.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.close();
                info!("Terminated MCP session: {}", id);
                true
            }
            None => false,
        }
    }

    /// Close every session idle for at least `idle_timeout`. Returns the ids
    /// of the evicted sessions.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> Vec<String> {
        self.evict_idle_at(idle_timeout, Instant::now()).await
    }

    pub(crate) async fn evict_idle_at(&self, idle_timeout: Duration, now: Instant) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.idle_for(now) >= idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(session) = sessions.remove(id) {
                session.close();
                info!(
                    "Evicted idle MCP session: {} (age: {}s)",
                    id,
                    now.saturating_duration_since(session.created_at).as_secs()
                );
            }
        }
        idle
    }

    /// Drop events older than the resume window from every session's log.
    pub async fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now()).await
    }

    pub(crate) async fn prune_expired_at(&self, now: Instant) -> usize {
        let sessions = self.sessions.read().await;
        let pruned: usize = sessions.values().map(|s| s.prune_expired(now)).sum();
        if pruned > 0 {
            debug!("Pruned {} expired MCP events", pruned);
        }
        pruned
    }

    /// Close and remove every session.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            info!("Closed {} MCP session(s)", drained.len());
        }
        drained.len()
    }

    /// Get the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
