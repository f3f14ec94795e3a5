//! Process-wide fan-out of runner output.
//!
//! Every published line lands in a bounded replay buffer and is pushed to each
//! live subscriber's own bounded queue. Pushing never blocks: a subscriber
//! whose queue is full or whose receiver is gone is dropped, so one stalled
//! viewer cannot hold up the worker or the other viewers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, Copy)]
pub struct BroadcasterLimits {
    /// Lines retained for replay.
    pub capacity: usize,
    /// Tail length sent to a new subscriber.
    pub replay: usize,
    /// Undelivered lines a subscriber may have queued before it is dropped.
    pub subscriber_queue: usize,
}

impl Default for BroadcasterLimits {
    fn default() -> Self {
        Self {
            capacity: 500,
            replay: 200,
            subscriber_queue: 1024,
        }
    }
}

#[derive(Default)]
struct BroadcastState {
    buffer: VecDeque<String>,
    subscribers: HashMap<u64, mpsc::Sender<String>>,
}

struct Shared {
    name: &'static str,
    limits: BroadcasterLimits,
    state: Mutex<BroadcastState>,
    next_id: AtomicU64,
}

/// Cheap to clone; clones share one buffer and subscriber set.
#[derive(Clone)]
pub struct LogBroadcaster {
    shared: Arc<Shared>,
}

impl LogBroadcaster {
    pub fn new(name: &'static str, limits: BroadcasterLimits) -> Self {
        let limits = BroadcasterLimits {
            capacity: limits.capacity.max(1),
            replay: limits.replay.min(limits.capacity.max(1)),
            subscriber_queue: limits.subscriber_queue.max(1),
        };
        Self {
            shared: Arc::new(Shared {
                name,
                limits,
                state: Mutex::new(BroadcastState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn publish(&self, line: impl Into<String>) {
        let line = line.into();
        let mut state = self.lock();

        if state.buffer.len() >= self.shared.limits.capacity {
            state.buffer.pop_front();
        }
        state.buffer.push_back(line.clone());

        let mut dropped = Vec::new();
        for (id, tx) in state.subscribers.iter() {
            match tx.try_send(line.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            state.subscribers.remove(&id);
            tracing::debug!(channel = self.shared.name, subscriber = id, "dropped log subscriber");
        }
    }

    /// Register a live viewer. The returned subscription already holds the
    /// buffer tail; later publishes follow in order.
    pub fn subscribe(&self) -> LogSubscription {
        let limits = self.shared.limits;
        let (tx, rx) = mpsc::channel(limits.subscriber_queue + limits.replay);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.lock();
            let skip = state.buffer.len().saturating_sub(limits.replay);
            for line in state.buffer.iter().skip(skip) {
                // Capacity covers the whole replay, so this cannot fill up.
                let _ = tx.try_send(line.clone());
            }
            state.subscribers.insert(id, tx);
        }

        LogSubscription {
            id,
            receiver: rx,
            broadcaster: Arc::downgrade(&self.shared),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Copy of the replay buffer, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().buffer.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A live viewer's end of the channel. Dropping it unsubscribes.
pub struct LogSubscription {
    id: u64,
    receiver: mpsc::Receiver<String>,
    broadcaster: std::sync::Weak<Shared>,
}

impl LogSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.broadcaster.upgrade() {
            shared
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .subscribers
                .remove(&self.id);
        }
    }
}
