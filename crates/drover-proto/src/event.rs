//! Watch-stream events published to subscribers.

use rkyv::{Archive, Deserialize, Serialize};

use crate::types::OfferId;

/// A host-scoped event on the watch stream.
///
/// Events are ordered per host; no ordering is guaranteed across hosts.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub hostname: String,
    pub kind: HostEventKind,
    /// Offer the event concerns, for offer-scoped kinds.
    pub offer_id: Option<OfferId>,
}

impl HostEvent {
    /// Creates a host-scoped event without an offer id.
    #[must_use]
    pub fn host(hostname: impl Into<String>, kind: HostEventKind) -> Self {
        Self {
            hostname: hostname.into(),
            kind,
            offer_id: None,
        }
    }

    /// Creates an offer-scoped event.
    #[must_use]
    pub fn offer(hostname: impl Into<String>, kind: HostEventKind, offer_id: OfferId) -> Self {
        Self {
            hostname: hostname.into(),
            kind,
            offer_id: Some(offer_id),
        }
    }
}

/// What happened on the host.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    /// An offer entered the host's summary.
    OfferAdded,
    /// An offer left the summary (launch, rescind, decline or expiry).
    OfferRemoved,
    /// The host moved to Placing for a placement round.
    HostPlacing,
    /// The host moved back to Ready.
    HostReady,
    /// The host was held for one or more tasks.
    HostHeld,
    /// A hold on the host was released.
    HostReleased,
}
