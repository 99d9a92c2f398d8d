use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

/// Generic event stream with a bounded replay buffer
///
/// Late subscribers call [`Subscriber::replay_buffer`] to catch up on what was
/// published before they subscribed, then `recv` for live events.
pub struct EventStream<T: Clone + Send + Sync + 'static> {
    sender: broadcast::Sender<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
    buffer_size: usize,
    stats: Arc<RwLock<EventStreamStats>>,
}

/// Statistics for monitoring stream activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStreamStats {
    pub events_published: u64,
    /// Events published while nobody was subscribed (still buffered)
    pub events_unobserved: u64,
}

impl<T: Clone + Send + Sync + 'static> EventStream<T> {
    /// Create a new event stream with specified capacity
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        debug!(capacity, buffer_size, "Creating new event stream");
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(buffer_size))),
            buffer_size,
            stats: Arc::new(RwLock::new(EventStreamStats::default())),
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> Subscriber<T> {
        trace!("New subscriber registered to event stream");
        Subscriber {
            receiver: self.sender.subscribe(),
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Publish an event to all subscribers, returning how many received it
    ///
    /// A stream without subscribers is not an error: the event is buffered for
    /// replay and counted as unobserved.
    pub async fn publish(&self, event: T) -> usize {
        self.buffer_event(event.clone()).await;

        let receivers = self.sender.send(event).unwrap_or(0);

        let mut stats = self.stats.write().await;
        stats.events_published += 1;
        if receivers == 0 {
            stats.events_unobserved += 1;
        }
        trace!(receivers, "Event published");

        receivers
    }

    /// Store an event in the buffer for replay
    async fn buffer_event(&self, event: T) {
        if self.buffer_size == 0 {
            return;
        }

        let mut buffer = self.buffer.write().await;
        buffer.push_back(event);

        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }
    }

    /// Most recently published event, if any is still buffered
    pub async fn latest(&self) -> Option<T> {
        self.buffer.read().await.back().cloned()
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> EventStreamStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics counters
    pub async fn reset_stats(&self) {
        *self.stats.write().await = EventStreamStats::default();
        debug!("Event stream statistics reset to defaults");
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscriber for receiving events from a stream
pub struct Subscriber<T: Clone + Send + Sync + 'static> {
    receiver: broadcast::Receiver<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Subscriber<T> {
    /// Receive the next event
    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Replay events from the buffer
    pub async fn replay_buffer(&mut self) -> Vec<T> {
        let buffer = self.buffer.read().await;
        buffer.iter().cloned().collect()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            buffer: Arc::clone(&self.buffer),
            buffer_size: self.buffer_size,
            stats: Arc::clone(&self.stats),
        }
    }
}
