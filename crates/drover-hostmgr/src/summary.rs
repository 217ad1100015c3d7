//! Per-host offer summary and placement state machine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use drover_proto::{HostFilter, HostFilterResult, Offer, OfferId, TaskId};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::constraints::Evaluator;
use crate::error::{HostMgrError, Result};
use crate::matcher::match_host_filter;
use crate::scalar::{Resources, Scope};

/// Offers with maintenance starting inside this window are declined on
/// ingest.
pub const UNAVAILABLE_OFFER_LOOKAHEAD: Duration = Duration::from_secs(3 * 60 * 60);

/// True when the offer's maintenance window starts inside the lookahead
/// or has already started. Such offers never enter the pool.
#[must_use]
pub fn should_decline_offer(offer: &Offer, now_nanos: i64) -> bool {
    match &offer.unavailability {
        Some(unavailability) => {
            let lookahead =
                now_nanos.saturating_add(UNAVAILABLE_OFFER_LOOKAHEAD.as_nanos() as i64);
            unavailability.start_nanos <= lookahead
        }
        None => false,
    }
}

/// Placement status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostStatus {
    /// Offers may be matched and claimed.
    Ready,
    /// Offers are claimed by a placement round.
    Placing,
}

/// Which offers to read from a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferScope {
    Reserved,
    Unreserved,
    All,
}

/// Result of adding one offer to a summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOfferOutcome {
    /// Offer stored; carries the post-insert status.
    Stored(HostStatus),
    /// Offer rejected for imminent maintenance; decline it upstream.
    Declined(OfferId),
}

/// Offers handed to a placement client, tagged with the claim id it must
/// present at launch.
#[derive(Debug, Clone)]
pub struct ClaimedOffers {
    pub claim_id: String,
    pub offers: Vec<Offer>,
}

struct SummaryState {
    status: HostStatus,
    unreserved: HashMap<OfferId, Offer>,
    reserved: HashMap<OfferId, Offer>,
    /// Incrementally maintained sum of `unreserved`.
    unreserved_amount: Resources,
    /// Claim issued at the last Ready→Placing transition.
    claim_id: Option<String>,
    /// Valid only while status is Placing.
    placing_expiration: Option<Instant>,
    held_tasks: HashMap<TaskId, Instant>,
    /// Offers seen since the last status transition.
    ready_count: u64,
}

/// One host, one serial state machine.
///
/// All mutations run under the summary's own mutex; the pool never holds
/// its index lock while calling in here.
pub struct HostSummary {
    hostname: String,
    placing_timeout: Duration,
    held_timeout: Duration,
    slack_types: Vec<String>,
    state: Mutex<SummaryState>,
}

impl HostSummary {
    /// Creates an empty summary in Ready status.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        placing_timeout: Duration,
        held_timeout: Duration,
        slack_types: Vec<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            placing_timeout,
            held_timeout,
            slack_types,
            state: Mutex::new(SummaryState {
                status: HostStatus::Ready,
                unreserved: HashMap::new(),
                reserved: HashMap::new(),
                unreserved_amount: Resources::default(),
                claim_id: None,
                placing_expiration: None,
                held_tasks: HashMap::new(),
                ready_count: 0,
            }),
        }
    }

    /// The hostname this summary tracks.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Stores an offer, or rejects it when its maintenance window starts
    /// within the lookahead (or has already started).
    ///
    /// A new offer arriving while the host is Placing is queued without
    /// reverting the status or extending the claim window.
    pub fn add_offer(&self, offer: Offer, now_nanos: i64) -> AddOfferOutcome {
        if should_decline_offer(&offer, now_nanos) {
            debug!(
                hostname = %self.hostname,
                offer_id = %offer.id,
                "declining offer inside maintenance lookahead"
            );
            return AddOfferOutcome::Declined(offer.id);
        }

        let mut state = self.state.lock();
        if offer.is_reserved() {
            state.reserved.insert(offer.id.clone(), offer);
        } else {
            let amount = Resources::from_offer(&offer, Scope::WithRevocable, &self.slack_types);
            state.unreserved_amount = state.unreserved_amount.add(&amount);
            state.unreserved.insert(offer.id.clone(), offer);
        }
        state.ready_count += 1;
        AddOfferOutcome::Stored(state.status)
    }

    /// Removes an offer from whichever map holds it.
    ///
    /// Returns the post-remove status and the removed offer. A missing
    /// id is a no-op reporting `(Ready, None)`. Removing the last offer
    /// resets the summary to Ready.
    pub fn remove_offer(&self, offer_id: &OfferId) -> (HostStatus, Option<Offer>) {
        let mut state = self.state.lock();
        let removed = if let Some(offer) = state.unreserved.remove(offer_id) {
            let amount = Resources::from_offer(&offer, Scope::WithRevocable, &self.slack_types);
            state.unreserved_amount = state.unreserved_amount.subtract_or_zero(&amount);
            Some(offer)
        } else {
            state.reserved.remove(offer_id)
        };

        if removed.is_none() {
            return (HostStatus::Ready, None);
        }

        if state.unreserved.is_empty() && state.reserved.is_empty() {
            Self::transition(&mut state, HostStatus::Ready);
        }
        (state.status, removed)
    }

    /// True iff unreserved offers exist and the host is Ready.
    #[must_use]
    pub fn has_offer(&self) -> bool {
        let state = self.state.lock();
        !state.unreserved.is_empty() && state.status == HostStatus::Ready
    }

    /// True iff any offers exist, regardless of status.
    #[must_use]
    pub fn has_any_offer(&self) -> bool {
        let state = self.state.lock();
        !state.unreserved.is_empty() || !state.reserved.is_empty()
    }

    /// Sum of unreserved resources and the current status.
    #[must_use]
    pub fn unreserved_amount(&self) -> (Resources, HostStatus) {
        let state = self.state.lock();
        (state.unreserved_amount, state.status)
    }

    /// Current placement status.
    #[must_use]
    pub fn status(&self) -> HostStatus {
        self.state.lock().status
    }

    /// Offers seen since the last status transition.
    #[must_use]
    pub fn ready_count(&self) -> u64 {
        self.state.lock().ready_count
    }

    /// Copies out offers in the requested scope.
    #[must_use]
    pub fn get_offers(&self, scope: OfferScope) -> HashMap<OfferId, Offer> {
        let state = self.state.lock();
        let mut offers = HashMap::new();
        if matches!(scope, OfferScope::Unreserved | OfferScope::All) {
            offers.extend(state.unreserved.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if matches!(scope, OfferScope::Reserved | OfferScope::All) {
            offers.extend(state.reserved.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        offers
    }

    /// Matches the filter against this host and, on success, moves the
    /// host to Placing and issues a claim id.
    ///
    /// A Placing host reports `MismatchStatus` without evaluating the
    /// filter.
    pub fn try_match(
        &self,
        filter: &HostFilter,
        evaluator: &dyn Evaluator,
    ) -> (HostFilterResult, Option<ClaimedOffers>) {
        let mut state = self.state.lock();
        if state.status == HostStatus::Placing {
            return (HostFilterResult::MismatchStatus, None);
        }

        let result = match_host_filter(
            &self.hostname,
            &state.unreserved,
            filter,
            evaluator,
            &self.slack_types,
        );
        if result != HostFilterResult::Match {
            return (result, None);
        }

        let claim_id = Uuid::new_v4().to_string();
        Self::transition(&mut state, HostStatus::Placing);
        state.claim_id = Some(claim_id.clone());
        state.placing_expiration = Some(Instant::now() + self.placing_timeout);
        let offers = state.unreserved.values().cloned().collect();
        (
            HostFilterResult::Match,
            Some(ClaimedOffers { claim_id, offers }),
        )
    }

    /// Atomically takes offers for launch.
    ///
    /// The unreserved path requires the host to be Placing under the
    /// presented claim id and moves it back to Ready. The reserved path
    /// drains reserved offers without touching placement state.
    pub fn claim_for_launch(
        &self,
        use_reserved: bool,
        claim_id: &str,
    ) -> Result<HashMap<OfferId, Offer>> {
        let mut state = self.state.lock();

        if use_reserved {
            let taken: HashMap<OfferId, Offer> = state.reserved.drain().collect();
            return Ok(taken);
        }

        // The claim check runs first: a claim invalidated by return,
        // expiry or a concurrent launch reports InvalidClaim, not a
        // status conflict.
        if state.claim_id.as_deref() != Some(claim_id) {
            return Err(HostMgrError::InvalidClaim {
                hostname: self.hostname.clone(),
                reason: "claim id does not match the active claim".to_owned(),
            });
        }
        if state.status != HostStatus::Placing {
            return Err(HostMgrError::Conflict {
                hostname: self.hostname.clone(),
                reason: "host status is not Placing".to_owned(),
            });
        }

        let taken: HashMap<OfferId, Offer> = state.unreserved.drain().collect();
        state.unreserved_amount = Resources::default();
        Self::transition(&mut state, HostStatus::Ready);
        Ok(taken)
    }

    /// Compare-and-swap on the placement status.
    pub fn cas_status(&self, from: HostStatus, to: HostStatus) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != from {
            return Err(HostMgrError::Conflict {
                hostname: self.hostname.clone(),
                reason: format!("status is {:?}, expected {from:?}", state.status),
            });
        }
        Self::transition(&mut state, to);
        Ok(())
    }

    /// Returns a Placing host to Ready; offers stay resident.
    ///
    /// Reports whether the status changed.
    pub fn return_unused_offers(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != HostStatus::Placing {
            return false;
        }
        Self::transition(&mut state, HostStatus::Ready);
        true
    }

    /// Reverts an expired Placing host to Ready.
    ///
    /// Returns whether a reset happened and the resources it freed for
    /// placement.
    pub fn reset_expired_placing_status(&self, now: Instant) -> (bool, Resources) {
        let mut state = self.state.lock();
        if state.status != HostStatus::Placing {
            return (false, Resources::default());
        }
        match state.placing_expiration {
            Some(expiration) if expiration <= now => {
                Self::transition(&mut state, HostStatus::Ready);
                (true, state.unreserved_amount)
            }
            _ => (false, Resources::default()),
        }
    }

    /// Marks this host as held for the given tasks.
    ///
    /// Each hold gets its own expiration; re-holding a task refreshes it.
    pub fn hold_for_tasks(&self, task_ids: &[TaskId], now: Instant) {
        let expiration = now + self.held_timeout;
        let mut state = self.state.lock();
        for task_id in task_ids {
            state.held_tasks.insert(task_id.clone(), expiration);
        }
    }

    /// Releases holds for the given tasks; returns the ids that were
    /// actually held here.
    pub fn release_hold_for_tasks(&self, task_ids: &[TaskId]) -> Vec<TaskId> {
        let mut state = self.state.lock();
        task_ids
            .iter()
            .filter(|id| state.held_tasks.remove(id).is_some())
            .cloned()
            .collect()
    }

    /// Drops expired holds; returns the released task ids.
    pub fn reset_expired_held_status(&self, now: Instant) -> Vec<TaskId> {
        let mut state = self.state.lock();
        let expired: Vec<TaskId> = state
            .held_tasks
            .iter()
            .filter(|(_, expiration)| **expiration <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.held_tasks.remove(id);
        }
        expired
    }

    /// Tasks this host is currently held for.
    #[must_use]
    pub fn held_tasks(&self) -> Vec<TaskId> {
        self.state.lock().held_tasks.keys().cloned().collect()
    }

    /// Earliest hold expiration, if any holds exist.
    #[must_use]
    pub fn held_expiration(&self) -> Option<Instant> {
        self.state.lock().held_tasks.values().min().copied()
    }

    fn transition(state: &mut SummaryState, to: HostStatus) {
        state.status = to;
        state.ready_count = 0;
        if to == HostStatus::Ready {
            state.claim_id = None;
            state.placing_expiration = None;
        }
    }
}

impl std::fmt::Debug for HostSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HostSummary")
            .field("hostname", &self.hostname)
            .field("status", &state.status)
            .field("unreserved", &state.unreserved.len())
            .field("reserved", &state.reserved.len())
            .field("held_tasks", &state.held_tasks.len())
            .finish()
    }
}
