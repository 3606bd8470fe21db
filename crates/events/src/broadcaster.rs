//! Per-session ordered event log with content-delta coalescing, replay, and
//! heartbeats, fanned out to one or more transport subscribers.
//!
//! Mirrors the donor's preference for a dedicated per-key aggregator over
//! per-emit timers (see `tools::manager::OutputBuffer`): buffered deltas are
//! flushed either by a session-wide ticker once their window elapses, or
//! immediately when a non-delta event for the same message forces them out.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use sa_domain::config::BroadcastConfig;
use sa_domain::event::{Event, EventType};

/// How often the per-session ticker checks buffered deltas for expiry.
/// Deliberately finer-grained than the throttle window itself.
const TICK_GRANULARITY: Duration = Duration::from_millis(25);

struct PendingDelta {
    text: String,
    first_seen: Instant,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct SessionInner {
    conversation_id: String,
    next_seq: u64,
    history: VecDeque<Event>,
    subscribers: Vec<Subscriber>,
    pending_deltas: HashMap<(String, u32), PendingDelta>,
    next_subscriber_id: u64,
}

impl SessionInner {
    fn alloc_event(&mut self, event_type: EventType, message_id: Option<String>, data: serde_json::Value) -> Event {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut ev = Event::new(seq, event_type, String::new(), self.conversation_id.clone(), data);
        ev.message_id = message_id;
        ev
    }

    fn publish(&mut self, session_id: &str, mut ev: Event, replay_cap: usize) -> Event {
        ev.session_id = session_id.to_string();
        self.history.push_back(ev.clone());
        while self.history.len() > replay_cap {
            self.history.pop_front();
        }
        self.subscribers.retain_mut(|sub| match sub.tx.try_send(ev.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id, subscriber_id = sub.id, "subscriber buffer full, dropping subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        ev
    }

    /// Flush one buffered delta key into the ordered log, if present.
    fn flush_delta(&mut self, session_id: &str, key: &(String, u32), replay_cap: usize) -> Option<Event> {
        let pending = self.pending_deltas.remove(key)?;
        let data = serde_json::json!({ "index": key.1, "delta": pending.text });
        let ev = self.alloc_event(EventType::ContentDelta, Some(key.0.clone()), data);
        Some(self.publish(session_id, ev, replay_cap))
    }

    /// Flush every buffered delta belonging to `message_id` (force-flush on
    /// any non-delta event for the same message).
    fn flush_message(&mut self, session_id: &str, message_id: &str, replay_cap: usize) {
        let keys: Vec<(String, u32)> = self
            .pending_deltas
            .keys()
            .filter(|(mid, _)| mid == message_id)
            .cloned()
            .collect();
        for key in keys {
            self.flush_delta(session_id, &key, replay_cap);
        }
    }
}

/// One session's ordered log, subscriber set, and delta-coalescing state.
struct SessionLog {
    inner: Mutex<SessionInner>,
    closed: AtomicBool,
}

/// Result of a `subscribe` call: a receiver plus whether the replay window
/// had to be truncated because `after_seq` fell below the retained history.
pub struct SubscribeResult {
    pub receiver: mpsc::Receiver<Event>,
    pub gap: bool,
}

/// Owns every active session's event log. Cheap to clone (internally
/// `Arc`-backed); intended to be shared process-wide behind `AppState`.
#[derive(Clone)]
pub struct EventBroadcaster {
    config: BroadcastConfig,
    sessions: Arc<Mutex<HashMap<String, Arc<SessionLog>>>>,
}

impl EventBroadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn get_or_create(&self, session_id: &str, conversation_id: &str) -> Arc<SessionLog> {
        let mut sessions = self.sessions.lock();
        if let Some(log) = sessions.get(session_id) {
            return log.clone();
        }
        let log = Arc::new(SessionLog {
            inner: Mutex::new(SessionInner {
                conversation_id: conversation_id.to_string(),
                next_seq: 1,
                history: VecDeque::new(),
                subscribers: Vec::new(),
                pending_deltas: HashMap::new(),
                next_subscriber_id: 0,
            }),
            closed: AtomicBool::new(false),
        });
        sessions.insert(session_id.to_string(), log.clone());
        self.spawn_heartbeat(session_id.to_string(), log.clone());
        self.spawn_delta_ticker(session_id.to_string(), log.clone());
        log
    }

    /// Emit an event, assigning `event_uuid`/`seq`/`timestamp`. `content_delta`
    /// events are coalesced per `(message_id, index)` within the configured
    /// throttle window instead of being published immediately; every other
    /// event first force-flushes any buffered deltas sharing its `message_id`.
    ///
    /// `data` for a `content_delta` call must carry `{"index": u32, "delta": string}`.
    pub fn emit(
        &self,
        session_id: &str,
        conversation_id: &str,
        event_type: EventType,
        message_id: Option<String>,
        data: serde_json::Value,
    ) -> Option<Event> {
        let log = self.get_or_create(session_id, conversation_id);
        if log.closed.load(Ordering::Acquire) {
            return None;
        }
        let replay_cap = self.config.replay_buffer_size;

        if event_type == EventType::ContentDelta {
            let mid = message_id.unwrap_or_default();
            let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let delta = data.get("delta").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let mut inner = log.inner.lock();
            let key = (mid, index);
            let entry = inner.pending_deltas.entry(key).or_insert_with(|| PendingDelta {
                text: String::new(),
                first_seen: Instant::now(),
            });
            entry.text.push_str(&delta);
            return None;
        }

        let mut inner = log.inner.lock();
        if let Some(mid) = &message_id {
            inner.flush_message(session_id, mid, replay_cap);
        }
        let ev = inner.alloc_event(event_type, message_id, data);
        Some(inner.publish(session_id, ev, replay_cap))
    }

    /// Subscribe to events with `seq > after_seq`. Replays retained history
    /// synchronously (best-effort — truncated if the subscriber's buffer
    /// fills) before the channel starts carrying live events.
    pub fn subscribe(&self, session_id: &str, conversation_id: &str, after_seq: u64) -> SubscribeResult {
        let log = self.get_or_create(session_id, conversation_id);
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer_size.max(1));
        let mut inner = log.inner.lock();

        let earliest_retained = inner.history.front().map(|e| e.seq);
        let gap = matches!(earliest_retained, Some(first) if after_seq > 0 && after_seq + 1 < first);

        for ev in inner.history.iter().filter(|e| e.seq > after_seq) {
            if tx.try_send(ev.clone()).is_err() {
                break;
            }
        }

        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push(Subscriber { id, tx });

        SubscribeResult { receiver: rx, gap }
    }

    /// Idempotent. Flushes any buffered deltas, then drops all subscribers
    /// and marks the session closed (a closed session's future `emit` calls
    /// are silently dropped).
    pub fn close(&self, session_id: &str) {
        let log = {
            let sessions = self.sessions.lock();
            match sessions.get(session_id) {
                Some(l) => l.clone(),
                None => return,
            }
        };
        if log.closed.swap(true, Ordering::AcqRel) {
            return; // already closed
        }
        let replay_cap = self.config.replay_buffer_size;
        let mut inner = log.inner.lock();
        let keys: Vec<(String, u32)> = inner.pending_deltas.keys().cloned().collect();
        for key in keys {
            inner.flush_delta(session_id, &key, replay_cap);
        }
        inner.subscribers.clear();
    }

    fn spawn_heartbeat(&self, session_id: String, log: Arc<SessionLog>) {
        let interval = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; discard
            loop {
                ticker.tick().await;
                if log.closed.load(Ordering::Acquire) {
                    break;
                }
                let ev = Event::new(0, EventType::Ping, session_id.clone(), {
                    let inner = log.inner.lock();
                    inner.conversation_id.clone()
                }, serde_json::Value::Null);
                let mut inner = log.inner.lock();
                inner.subscribers.retain_mut(|sub| match sub.tx.try_send(ev.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => false,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        });
    }

    fn spawn_delta_ticker(&self, session_id: String, log: Arc<SessionLog>) {
        let window = Duration::from_millis(self.config.delta_throttle_ms.max(1));
        let replay_cap = self.config.replay_buffer_size;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_GRANULARITY);
            loop {
                ticker.tick().await;
                if log.closed.load(Ordering::Acquire) {
                    break;
                }
                let mut inner = log.inner.lock();
                let now = Instant::now();
                let expired: Vec<(String, u32)> = inner
                    .pending_deltas
                    .iter()
                    .filter(|(_, p)| now.duration_since(p.first_seen) >= window)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in expired {
                    inner.flush_delta(&session_id, &key, replay_cap);
                }
            }
        });
    }
}
