//! Correlation tables for a persistent connection.
//!
//! [`CorrelationStore`] maps outstanding request ids to the oneshot that
//! resolves the caller, and owns the [`SubscriptionTable`] that maps
//! server-assigned subscription ids to push callbacks. Both are mutated from
//! the send path and from the connection task's [`CorrelationStore::dispatch`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::SdkError;
use crate::jsonrpc::envelope::{parse_incoming, IncomingMessage};

/// What a pending request is eventually resolved with.
pub type Reply = Result<Value, SdkError>;

/// Push callback invoked with the raw `result` of each notification.
pub type NotificationCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Notifications held for ids not registered yet.
const BACKLOG_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Request id allocator + correlation table, plus the subscription table.
#[derive(Default)]
pub struct CorrelationStore {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    subscriptions: SubscriptionTable,
}

/// Outcome of dispatching one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A response; `matched` is false when no request was waiting for `id`.
    Response { id: Option<u64>, matched: bool },
    /// A push notification; `delivered` is false when no callback is registered.
    Notification { subscription: u64, delivered: bool },
    /// Not a JSON-RPC response or notification.
    Invalid,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id. Ids start at 1 and never repeat.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a pending request and return the receiver its reply lands in.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        rx
    }

    /// Remove the entry for `id` and fulfil it. Returns false if none existed.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        let entry = lock(&self.pending).remove(&id);
        match entry {
            // The caller may have stopped waiting; that is not an error.
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without resolving it (timeout, send failure).
    pub fn forget(&self, id: u64) -> bool {
        lock(&self.pending).remove(&id).is_some()
    }

    /// Fail every outstanding request, e.g. when the connection goes away.
    pub fn fail_all(&self, error: impl Fn() -> SdkError) -> usize {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
        count
    }

    /// Number of requests still waiting for a response.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Route one inbound text frame.
    ///
    /// Responses resolve (and remove) their correlation entry; responses with
    /// no entry are dropped. Notifications go to the callback registered for
    /// their subscription id.
    pub fn dispatch(&self, text: &str) -> Dispatch {
        let message = match parse_incoming(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring unparseable JSON-RPC message: {} (raw: {})", e, text);
                return Dispatch::Invalid;
            }
        };

        match message {
            IncomingMessage::Response(response) => {
                let id = response.id.as_u64();
                let matched = match id {
                    Some(id) => {
                        let reply = response.into_result().map_err(SdkError::from);
                        self.resolve(id, reply)
                    }
                    None => false,
                };
                if !matched {
                    tracing::trace!(id = ?id, "Dropping response with no outstanding request");
                }
                Dispatch::Response { id, matched }
            }
            IncomingMessage::Notification(notification) => {
                let subscription = notification.params.subscription;
                let result = notification.params.result.unwrap_or(Value::Null);
                let delivered = self.subscriptions.notify(subscription, result);
                Dispatch::Notification {
                    subscription,
                    delivered,
                }
            }
        }
    }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// Subscription id → push callback. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    inner: Arc<Mutex<TableInner>>,
}

#[derive(Default)]
struct TableInner {
    callbacks: HashMap<u64, NotificationCallback>,
    /// Pushes that raced ahead of their subscribe acknowledgement.
    backlog: VecDeque<(u64, Value)>,
    /// Subscribe calls sent but not yet registered. Pushes for unknown ids
    /// are only held while this is non-zero.
    in_flight: usize,
}

/// Marks a subscribe call as in flight on a [`SubscriptionTable`].
///
/// While any guard is alive, pushes for unknown ids go to the backlog. When
/// the last guard drops, whatever is left in the backlog is discarded.
#[must_use]
pub struct PendingSubscribe {
    table: SubscriptionTable,
}

impl Drop for PendingSubscribe {
    fn drop(&mut self) {
        let mut inner = lock(&self.table.inner);
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 && !inner.backlog.is_empty() {
            tracing::trace!(dropped = inner.backlog.len(), "Discarding unclaimed notifications");
            inner.backlog.clear();
        }
    }
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the backlog window for one subscribe call.
    pub fn begin_subscribe(&self) -> PendingSubscribe {
        lock(&self.inner).in_flight += 1;
        PendingSubscribe {
            table: self.clone(),
        }
    }

    /// Register `callback` under `id` and replay any backlogged pushes for it.
    pub fn insert(&self, id: u64, callback: NotificationCallback) {
        let replay: Vec<Value> = {
            let mut inner = lock(&self.inner);
            if inner.callbacks.insert(id, callback.clone()).is_some() {
                tracing::warn!(subscription = id, "Replacing callback for reused subscription id");
            }
            let (matching, rest): (VecDeque<_>, VecDeque<_>) =
                inner.backlog.drain(..).partition(|(sub, _)| *sub == id);
            inner.backlog = rest;
            matching.into_iter().map(|(_, result)| result).collect()
        };
        for result in replay {
            callback(result);
        }
    }

    /// Remove the entry for `id`. Returns false if there was none.
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = lock(&self.inner);
        inner.backlog.retain(|(sub, _)| *sub != id);
        inner.callbacks.remove(&id).is_some()
    }

    /// Invoke the callback for `id`. The lock is not held during the call.
    ///
    /// Unknown ids are dropped, unless a subscribe call is in flight: then
    /// they are kept in a small bounded backlog and the oldest entry is
    /// discarded when it is full.
    pub fn notify(&self, id: u64, result: Value) -> bool {
        let callback = {
            let mut inner = lock(&self.inner);
            match inner.callbacks.get(&id) {
                Some(cb) => cb.clone(),
                None if inner.in_flight == 0 => {
                    tracing::trace!(subscription = id, "Dropping notification for unknown subscription");
                    return false;
                }
                None => {
                    if inner.backlog.len() == BACKLOG_CAPACITY {
                        inner.backlog.pop_front();
                    }
                    inner.backlog.push_back((id, result));
                    tracing::trace!(subscription = id, "Notification for unknown subscription");
                    return false;
                }
            }
        };
        callback(result);
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        lock(&self.inner).callbacks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every callback and backlogged push.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.callbacks.clear();
        inner.backlog.clear();
    }
}
