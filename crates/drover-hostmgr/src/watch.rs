//! Watch stream and master-event dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use drover_proto::{HostEvent, MasterEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pool::OfferPool;

/// Terminal errors delivered on a watch stream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchError {
    /// The subscriber fell behind and its buffer overran; it has been
    /// dropped and must resubscribe.
    #[error("subscriber overran its event buffer")]
    Overrun,
}

type EventItem = std::result::Result<HostEvent, WatchError>;

/// Publishes host events to subscribed clients.
///
/// Each subscriber has a bounded queue; a subscriber that stops draining
/// is disconnected with [`WatchError::Overrun`] rather than blocking the
/// pool. Events stay ordered per host; no global order is promised.
///
/// Subscribers are tracked by id only, so dropping an [`EventStream`]
/// never leaves a dangling reference; the publisher forgets the id on
/// the next publish.
pub struct EventPublisher {
    subscribers: DashMap<u64, mpsc::Sender<EventItem>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventPublisher {
    /// Creates a publisher whose subscribers buffer up to `capacity`
    /// events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        // One extra slot is reserved for the terminal error.
        let (tx, rx) = mpsc::channel(self.capacity + 1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        debug!(subscriber = id, "watch subscriber registered");
        EventStream { id, rx }
    }

    /// Removes a subscriber explicitly.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers an event to every subscriber, disconnecting any that
    /// have overrun their buffer.
    pub fn publish(&self, event: &HostEvent) {
        let mut dropped = Vec::new();
        for entry in &self.subscribers {
            let (id, tx) = (*entry.key(), entry.value());
            if tx.capacity() <= 1 {
                // Only the reserved slot remains: overrun.
                let _ = tx.try_send(Err(WatchError::Overrun));
                dropped.push(id);
                continue;
            }
            match tx.try_send(Ok(event.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let _ = tx.try_send(Err(WatchError::Overrun));
                    dropped.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(id),
            }
        }
        for id in dropped {
            warn!(subscriber = id, "dropping watch subscriber");
            self.subscribers.remove(&id);
        }
    }
}

/// A subscriber's view of the watch stream.
pub struct EventStream {
    id: u64,
    rx: mpsc::Receiver<EventItem>,
}

impl EventStream {
    /// Identifier for explicit unsubscription.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next event.
    ///
    /// `Ok(None)` means the publisher shut down cleanly; `Err` is
    /// terminal and the caller must resubscribe.
    pub async fn recv(&mut self) -> std::result::Result<Option<HostEvent>, WatchError> {
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Dispatches master events into the pool until the channel closes.
///
/// Offer batches are ingested, rescinds are applied, and terminal task
/// states release the task's host hold so the host becomes placeable by
/// others.
pub async fn run_event_loop(pool: Arc<OfferPool>, mut rx: mpsc::Receiver<MasterEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            MasterEvent::Offers(offers) => {
                let accepted = pool.add_offers(offers).await;
                debug!(accepted, "ingested offer batch");
            }
            MasterEvent::Rescind(offer_id) => {
                if !pool.rescind_offer(&offer_id) {
                    debug!(%offer_id, "rescind for unknown offer");
                }
            }
            MasterEvent::TaskStatus(update) => {
                if !update.state.is_terminal() {
                    continue;
                }
                if let Some(hostname) = pool.get_host_held_for_task(&update.task_id) {
                    if let Err(err) = pool.release_hold_for_tasks(&hostname, &[update.task_id.clone()]) {
                        warn!(task_id = %update.task_id, error = %err, "failed to release hold");
                    }
                }
            }
        }
    }
}
