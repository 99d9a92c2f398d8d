use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::auth::session::{AuthChange, AuthChangeKind, Session};

type Senders = Arc<DashMap<u64, mpsc::UnboundedSender<AuthChange>>>;

/// Fan-out of session changes to registered listeners
///
/// Each subscriber owns an unbounded queue, so a slow listener never loses a
/// change and unsubscribing removes exactly that listener.
pub struct ChangeFeed {
    subscribers: Senders,
    next_subscriber: AtomicU64,
    /// Next sequence number; the lock also serializes emission so every
    /// subscriber sees changes in sequence order
    sequence: Mutex<u64>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_subscriber: AtomicU64::new(1),
            sequence: Mutex::new(1),
        }
    }

    /// Register a listener
    pub fn subscribe(&self) -> AuthSubscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(id, sender);
        debug!(subscriber = id, "Auth change listener registered");

        let subscribers = Arc::clone(&self.subscribers);
        let handle = SubscriptionHandle::new(id, move || {
            if subscribers.remove(&id).is_some() {
                debug!(subscriber = id, "Auth change listener removed");
            }
        });

        AuthSubscription {
            receiver: ChangeReceiver { receiver },
            handle,
        }
    }

    /// Deliver a change to every listener, returning how many received it
    pub fn emit(&self, kind: AuthChangeKind, session: Option<Session>) -> usize {
        let mut next = match self.sequence.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let change = AuthChange {
            kind,
            session,
            sequence: *next,
            emitted_at: Utc::now(),
        };
        *next += 1;

        let mut closed = Vec::new();
        let mut delivered = 0;
        for entry in self.subscribers.iter() {
            if entry.value().send(change.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }

        trace!(kind = ?kind, sequence = change.sequence, delivered, "Auth change emitted");
        delivered
    }

    /// Number of registered listeners
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered listener: the receiving end plus its unsubscribe handle
pub struct AuthSubscription {
    receiver: ChangeReceiver,
    handle: SubscriptionHandle,
}

impl AuthSubscription {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// Receive the next change; `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.receiver.recv().await
    }

    /// Split so one task can consume changes while another owns the handle
    pub fn into_parts(self) -> (ChangeReceiver, SubscriptionHandle) {
        (self.receiver, self.handle)
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }
}

/// Receiving end of a subscription
pub struct ChangeReceiver {
    receiver: mpsc::UnboundedReceiver<AuthChange>,
}

impl ChangeReceiver {
    /// Receive the next change; `None` once the listener was removed
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.receiver.recv().await
    }
}

/// Releases a subscription exactly once, explicitly or on drop
pub struct SubscriptionHandle {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(id: u64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("active", &self.release.is_some())
            .finish()
    }
}
