//! # Broadcaster: single-writer, many-reader fan-out.
//!
//! [`Broadcaster`] delivers every published value to every registered subscriber,
//! in publish order, without dropping.
//!
//! ## Architecture
//! ```text
//! publish(v) ──(read lock)──► inbox S1 (unbounded) ──► delivery task ──► [bounded S1] ──► receiver
//!            ├──────────────► inbox S2 (unbounded) ──► delivery task ──► [bounded S2] ──► receiver
//!            └──────────────► inbox SN ...
//! ```
//!
//! ## Rules
//! - `publish` never awaits and never blocks on a slow subscriber: it only pushes
//!   into each subscriber's private inbox. The delivery task then waits for room in
//!   the bounded output queue (capacity ≥ 1).
//! - `unsubscribe` removes the inbox exactly once; the delivery task drains what was
//!   already queued and then closes the receiver.
//! - A subscriber that stops draining without unsubscribing only grows its own inbox.
//!   Callers must keep draining or unsubscribe promptly.
//! - A subscriber whose receiver was dropped is pruned on the next publish.
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use procvisor::Broadcaster;
//!
//! let bus: Broadcaster<u32> = Broadcaster::new();
//! let (id, mut rx) = bus.subscribe(Some(4));
//!
//! bus.publish(7);
//! assert_eq!(rx.recv().await, Some(7));
//!
//! assert!(bus.unsubscribe(id));
//! assert!(!bus.unsubscribe(id));
//! assert_eq!(rx.recv().await, None);
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// Default capacity of a subscriber's output queue.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1;

struct Shared<T> {
    next_id: AtomicU64,
    inboxes: RwLock<HashMap<u64, mpsc::UnboundedSender<T>>>,
}

/// Fan-out primitive. Cloning yields another handle to the same subscriber set.
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Creates an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(1),
                inboxes: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a subscriber and returns its id and receive endpoint.
    ///
    /// `capacity` sizes the output queue; `None` and `Some(0)` both mean
    /// [`DEFAULT_SUBSCRIBER_CAPACITY`]. Ids increase monotonically and are never reused.
    ///
    /// Must be called within a Tokio runtime (a delivery task is spawned).
    pub fn subscribe(&self, capacity: Option<usize>) -> (u64, mpsc::Receiver<T>) {
        let cap = capacity
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_SUBSCRIBER_CAPACITY);
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<T>();
        let (out_tx, out_rx) = mpsc::channel::<T>(cap);

        tokio::spawn(async move {
            while let Some(value) = inbox_rx.recv().await {
                if out_tx.send(value).await.is_err() {
                    break;
                }
            }
        });

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, inbox_tx);
        (id, out_rx)
    }

    /// Same as [`subscribe`](Self::subscribe), wrapped in a guard that unsubscribes on drop.
    pub fn subscription(&self, capacity: Option<usize>) -> Subscription<T> {
        let (id, rx) = self.subscribe(capacity);
        Subscription {
            guard: UnsubscribeGuard {
                bus: self.clone(),
                id,
            },
            rx,
        }
    }

    /// Removes a subscriber. Returns `false` if the id is unknown or already removed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Delivers `value` to every current subscriber.
    pub fn publish(&self, value: T) {
        let mut dead = Vec::new();
        {
            let inboxes = self
                .shared
                .inboxes
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, inbox) in inboxes.iter() {
                if inbox.send(value.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.unsubscribe(id);
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Republishes every item of `source`; subscribers stay open when it ends.
    pub async fn broadcast<S>(&self, source: S)
    where
        S: Stream<Item = T>,
    {
        let mut source = std::pin::pin!(source);
        while let Some(value) = source.next().await {
            self.publish(value);
        }
    }

    /// Republishes every item of `source`, then closes and clears all subscriptions.
    ///
    /// Subscribers registered afterwards start from a fresh, empty set.
    pub async fn bind_to<S>(&self, source: S)
    where
        S: Stream<Item = T>,
    {
        self.broadcast(source).await;
        self.close_all();
    }

    /// Closes and removes every subscription.
    pub fn close_all(&self) {
        self.shared
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

struct UnsubscribeGuard<T: Clone + Send + 'static> {
    bus: Broadcaster<T>,
    id: u64,
}

impl<T: Clone + Send + 'static> Drop for UnsubscribeGuard<T> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// A subscription that unsubscribes itself when dropped.
pub struct Subscription<T: Clone + Send + 'static> {
    guard: UnsubscribeGuard<T>,
    rx: mpsc::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Subscriber id.
    pub fn id(&self) -> u64 {
        self.guard.id
    }

    /// Receives the next value; `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Runs `f` with a fresh subscription and unsubscribes when it returns.
///
/// The subscription is released even if `f` returns early or panics
/// (the guard is dropped during unwinding).
pub async fn with_subscription<T, F, Fut, R>(
    bus: &Broadcaster<T>,
    capacity: Option<usize>,
    f: F,
) -> R
where
    T: Clone + Send + 'static,
    F: FnOnce(mpsc::Receiver<T>) -> Fut,
    Fut: Future<Output = R>,
{
    let (id, rx) = bus.subscribe(capacity);
    let _guard = UnsubscribeGuard {
        bus: bus.clone(),
        id,
    };
    f(rx).await
}
