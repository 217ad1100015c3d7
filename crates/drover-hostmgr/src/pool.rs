//! Process-wide offer pool: the host index and placement entry points.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use drover_proto::{
    HostEvent, HostEventKind, HostFilter, HostFilterResult, MasterCall, Offer, OfferId, RankHint,
    TaskId,
};
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::OfferPoolConfig;
use crate::constraints::{Evaluator, LabelEvaluator};
use crate::error::{HostMgrError, Result};
use crate::master::{FrameworkInfoProvider, MasterClient};
use crate::ranking::{self, Ranker};
use crate::summary::{AddOfferOutcome, HostStatus, HostSummary, OfferScope};
use crate::watch::EventPublisher;

/// An offer's entry in the expiry index.
#[derive(Debug, Clone)]
pub struct TimedOffer {
    pub hostname: String,
    pub expiration: Instant,
}

/// Offers for one host handed to a placement client.
#[derive(Debug, Clone)]
pub struct HostOffer {
    pub hostname: String,
    /// Claim the client must present at launch.
    pub claim_id: String,
    pub offers: Vec<Offer>,
}

/// The pool-wide index of host summaries.
///
/// One instance per process, bound to the leadership lifecycle. The pool
/// lock guards only summary creation and lookup; every state transition
/// happens under the summary's own mutex, and the lock order is always
/// pool then summary.
pub struct OfferPool {
    host_index: RwLock<HashMap<String, Arc<HostSummary>>>,
    /// Expiry index; must mirror the offers resident in summaries.
    timed_offers: DashMap<OfferId, TimedOffer>,
    /// task-id → hostname holds, last writer wins.
    held_index: DashMap<TaskId, String>,

    offer_hold_time: Duration,
    placing_timeout: Duration,
    held_timeout: Duration,
    slack_types: Vec<String>,

    ranker: Arc<dyn Ranker>,
    evaluator: Arc<dyn Evaluator>,
    master: Arc<dyn MasterClient>,
    framework: Arc<dyn FrameworkInfoProvider>,
    events: Arc<EventPublisher>,

    shuffle_rng: Mutex<SmallRng>,
}

impl OfferPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(
        config: &OfferPoolConfig,
        master: Arc<dyn MasterClient>,
        framework: Arc<dyn FrameworkInfoProvider>,
        ranker: Arc<dyn Ranker>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self {
            host_index: RwLock::new(HashMap::new()),
            timed_offers: DashMap::new(),
            held_index: DashMap::new(),
            offer_hold_time: config.offer_hold_time,
            placing_timeout: config.host_placing_offer_status_timeout,
            held_timeout: config.host_held_status_timeout,
            slack_types: config.slack_resource_types.clone(),
            ranker,
            evaluator: Arc::new(LabelEvaluator::new()),
            master,
            framework,
            events,
            shuffle_rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Replaces the constraint evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Ingests a batch of offers from the master.
    ///
    /// Offers with imminent unavailability are declined back to the
    /// master in one batch, after all summary locks are released; a
    /// decline failure is logged and retried implicitly by the next
    /// batch. Returns the number of offers accepted into the pool.
    pub async fn add_offers(&self, offers: Vec<Offer>) -> usize {
        let now_nanos = epoch_nanos();
        let now = Instant::now();
        let mut declined = Vec::new();
        let mut accepted = 0;

        for offer in offers {
            // Pre-check so unavailable offers never touch any summary.
            if crate::summary::should_decline_offer(&offer, now_nanos) {
                declined.push(offer.id);
                continue;
            }
            let offer_id = offer.id.clone();
            let hostname = offer.hostname.clone();
            let summary = self.summary_for(&hostname);
            match summary.add_offer(offer, now_nanos) {
                AddOfferOutcome::Stored(_) => {
                    self.timed_offers.insert(
                        offer_id.clone(),
                        TimedOffer {
                            hostname: hostname.clone(),
                            expiration: now + self.offer_hold_time,
                        },
                    );
                    accepted += 1;
                    self.events
                        .publish(&HostEvent::offer(hostname, HostEventKind::OfferAdded, offer_id));
                }
                AddOfferOutcome::Declined(offer_id) => declined.push(offer_id),
            }
        }

        if !declined.is_empty() {
            info!(count = declined.len(), "declining offers inside maintenance window");
            if let Err(err) = self.decline_to_master(declined).await {
                warn!(error = %err, "failed to decline unavailable offers");
            }
        }
        accepted
    }

    /// Applies a rescind from the master.
    ///
    /// Idempotent; returns false when the offer is unknown (already
    /// launched, expired, or never seen).
    pub fn rescind_offer(&self, offer_id: &OfferId) -> bool {
        let Some((_, timed)) = self.timed_offers.remove(offer_id) else {
            debug!(%offer_id, "rescinded offer not in pool");
            return false;
        };
        if let Some(summary) = self.lookup(&timed.hostname) {
            summary.remove_offer(offer_id);
        }
        self.events.publish(&HostEvent::offer(
            timed.hostname,
            HostEventKind::OfferRemoved,
            offer_id.clone(),
        ));
        true
    }

    /// Sweeps expired offers out of the pool.
    ///
    /// Removals are batched per host to touch each summary lock once.
    /// Returns the removed entries and the number still valid.
    pub fn remove_expired_offers(&self, now: Instant) -> (HashMap<OfferId, TimedOffer>, usize) {
        let mut expired: HashMap<OfferId, TimedOffer> = HashMap::new();
        let mut valid = 0usize;
        for entry in &self.timed_offers {
            if entry.value().expiration <= now {
                expired.insert(entry.key().clone(), entry.value().clone());
            } else {
                valid += 1;
            }
        }

        let mut by_host: HashMap<String, Vec<OfferId>> = HashMap::new();
        for (offer_id, timed) in &expired {
            by_host
                .entry(timed.hostname.clone())
                .or_default()
                .push(offer_id.clone());
        }

        for (hostname, offer_ids) in by_host {
            let summary = self.lookup(&hostname);
            for offer_id in offer_ids {
                self.timed_offers.remove(&offer_id);
                if let Some(summary) = &summary {
                    summary.remove_offer(&offer_id);
                }
                self.events.publish(&HostEvent::offer(
                    hostname.clone(),
                    HostEventKind::OfferRemoved,
                    offer_id,
                ));
            }
        }

        if !expired.is_empty() {
            debug!(expired = expired.len(), valid, "pruned expired offers");
        }
        (expired, valid)
    }

    /// Claims hosts for a placement round.
    ///
    /// Walks the ranked candidate list (host hints first) and moves every
    /// matched host to Placing, issuing a claim id per host. No two
    /// concurrent callers can receive the same host: the Ready→Placing
    /// transition serialises at the summary.
    pub fn claim_for_place(
        &self,
        filter: &HostFilter,
    ) -> Result<(HashMap<String, HostOffer>, HashMap<HostFilterResult, u32>)> {
        let minimum = filter.resource_constraint.minimum;
        if minimum.cpu < 0.0 || minimum.mem < 0.0 || minimum.disk < 0.0 || minimum.gpu < 0.0 {
            return Err(HostMgrError::InvalidInput(
                "filter resource minimums must be non-negative".to_owned(),
            ));
        }

        let index = self.host_index.read().clone();
        let ranked = self.ranked_host_summary_list(filter.hint.rank_hint, &index);

        // Hinted hosts walk first, still subject to matching.
        let mut ordered: Vec<Arc<HostSummary>> = Vec::with_capacity(ranked.len());
        let mut seen: HashSet<String> = HashSet::new();
        for hint in &filter.hint.host_hint {
            if let Some(summary) = index.get(&hint.hostname) {
                if seen.insert(hint.hostname.clone()) {
                    ordered.push(summary.clone());
                }
            }
        }
        for summary in ranked {
            if seen.insert(summary.hostname().to_owned()) {
                ordered.push(summary);
            }
        }

        let limit = match filter.quantity.max_hosts {
            0 => u32::MAX,
            n => n,
        };

        let mut matched: HashMap<String, HostOffer> = HashMap::new();
        let mut counts: HashMap<HostFilterResult, u32> = HashMap::new();
        for summary in ordered {
            if matched.len() as u32 >= limit {
                *counts.entry(HostFilterResult::MismatchMaxHostLimit).or_insert(0) += 1;
                continue;
            }
            let (result, claimed) = summary.try_match(filter, self.evaluator.as_ref());
            *counts.entry(result).or_insert(0) += 1;
            if let Some(claimed) = claimed {
                let hostname = summary.hostname().to_owned();
                self.events
                    .publish(&HostEvent::host(hostname.clone(), HostEventKind::HostPlacing));
                matched.insert(
                    hostname.clone(),
                    HostOffer {
                        hostname,
                        claim_id: claimed.claim_id,
                        offers: claimed.offers,
                    },
                );
            }
        }

        for (result, count) in &counts {
            metrics::counter!("drover_claim_results", "result" => result.as_str())
                .increment(u64::from(*count));
        }
        Ok((matched, counts))
    }

    /// Takes a claimed host's offers for launch.
    ///
    /// The consumed offers leave the expiry index as well; invariant 3
    /// (no offer leaks) holds across this call.
    pub fn claim_for_launch(
        &self,
        hostname: &str,
        use_reserved: bool,
        claim_id: &str,
    ) -> Result<HashMap<OfferId, Offer>> {
        let summary = self.lookup(hostname).ok_or_else(|| {
            HostMgrError::InvalidInput(format!("cannot find input hostname {hostname}"))
        })?;

        let taken = summary.claim_for_launch(use_reserved, claim_id)?;
        for offer_id in taken.keys() {
            self.timed_offers.remove(offer_id);
            self.events.publish(&HostEvent::offer(
                hostname.to_owned(),
                HostEventKind::OfferRemoved,
                offer_id.clone(),
            ));
        }
        if !use_reserved {
            self.events
                .publish(&HostEvent::host(hostname.to_owned(), HostEventKind::HostReady));
        }
        Ok(taken)
    }

    /// Returns a Placing host to Ready; its offers stay in the pool.
    ///
    /// Unknown hostnames and non-Placing hosts are no-ops.
    pub fn return_unused_offers(&self, hostname: &str) {
        let Some(summary) = self.lookup(hostname) else {
            debug!(%hostname, "return for unknown host");
            return;
        };
        if summary.return_unused_offers() {
            self.events
                .publish(&HostEvent::host(hostname.to_owned(), HostEventKind::HostReady));
        }
    }

    /// Removes offers locally and declines them to the master.
    ///
    /// Unknown ids are removed-from-pool no-ops but still included in
    /// the decline call; the master owns their validity.
    pub async fn decline_offers(&self, offer_ids: Vec<OfferId>) -> Result<()> {
        for offer_id in &offer_ids {
            if let Some((_, timed)) = self.timed_offers.remove(offer_id) {
                if let Some(summary) = self.lookup(&timed.hostname) {
                    summary.remove_offer(offer_id);
                }
                self.events.publish(&HostEvent::offer(
                    timed.hostname,
                    HostEventKind::OfferRemoved,
                    offer_id.clone(),
                ));
            }
        }
        self.decline_to_master(offer_ids).await
    }

    /// Evicts a reserved offer once its volume has been consumed.
    pub fn remove_reserved_offer(&self, hostname: &str, offer_id: &OfferId) {
        let Some(summary) = self.lookup(hostname) else {
            debug!(%hostname, "reserved-offer removal for unknown host");
            return;
        };
        let (_, removed) = summary.remove_offer(offer_id);
        if removed.is_some() {
            self.timed_offers.remove(offer_id);
            self.events.publish(&HostEvent::offer(
                hostname.to_owned(),
                HostEventKind::OfferRemoved,
                offer_id.clone(),
            ));
        }
    }

    /// Reverts hosts whose Placing status has expired.
    ///
    /// Takes a time snapshot so tests can inject time. Returns the
    /// hostnames reset.
    pub fn reset_expired_placing_host_summaries(&self, now: Instant) -> Vec<String> {
        let mut reset = Vec::new();
        for summary in self.snapshot() {
            let (changed, freed) = summary.reset_expired_placing_status(now);
            if changed {
                info!(
                    hostname = summary.hostname(),
                    %freed,
                    "placing status expired, host back to Ready"
                );
                self.events.publish(&HostEvent::host(
                    summary.hostname().to_owned(),
                    HostEventKind::HostReady,
                ));
                reset.push(summary.hostname().to_owned());
            }
        }
        reset
    }

    /// Drops expired holds. Returns the hostnames that had any.
    pub fn reset_expired_held_host_summaries(&self, now: Instant) -> Vec<String> {
        let mut reset = Vec::new();
        for summary in self.snapshot() {
            let released = summary.reset_expired_held_status(now);
            if released.is_empty() {
                continue;
            }
            for task_id in &released {
                // Only clear the index if the hold still points here; a
                // later hold on another host wins.
                self.held_index
                    .remove_if(task_id, |_, hostname| hostname == summary.hostname());
            }
            self.events.publish(&HostEvent::host(
                summary.hostname().to_owned(),
                HostEventKind::HostReleased,
            ));
            reset.push(summary.hostname().to_owned());
        }
        reset
    }

    /// Holds a host for the given tasks.
    pub fn hold_for_tasks(&self, hostname: &str, task_ids: &[TaskId]) -> Result<()> {
        let summary = self
            .lookup(hostname)
            .ok_or_else(|| HostMgrError::NotFound(hostname.to_owned()))?;
        summary.hold_for_tasks(task_ids, Instant::now());
        for task_id in task_ids {
            self.held_index.insert(task_id.clone(), hostname.to_owned());
        }
        self.events
            .publish(&HostEvent::host(hostname.to_owned(), HostEventKind::HostHeld));
        Ok(())
    }

    /// Releases holds for the given tasks.
    pub fn release_hold_for_tasks(&self, hostname: &str, task_ids: &[TaskId]) -> Result<()> {
        let summary = self
            .lookup(hostname)
            .ok_or_else(|| HostMgrError::NotFound(hostname.to_owned()))?;
        summary.release_hold_for_tasks(task_ids);
        for task_id in task_ids {
            self.held_index.remove(task_id);
        }
        self.events
            .publish(&HostEvent::host(hostname.to_owned(), HostEventKind::HostReleased));
        Ok(())
    }

    /// Host the task is currently held on, if any.
    #[must_use]
    pub fn get_host_held_for_task(&self, task_id: &TaskId) -> Option<String> {
        self.held_index.get(task_id).map(|entry| entry.value().clone())
    }

    /// Summary for one host.
    pub fn get_host_summary(&self, hostname: &str) -> Result<Arc<HostSummary>> {
        self.lookup(hostname)
            .ok_or_else(|| HostMgrError::NotFound(hostname.to_owned()))
    }

    /// Summaries for the requested hostnames; an empty list returns all.
    #[must_use]
    pub fn get_host_summaries(&self, hostnames: &[String]) -> HashMap<String, Arc<HostSummary>> {
        let index = self.host_index.read();
        if hostnames.is_empty() {
            return index.clone();
        }
        hostnames
            .iter()
            .filter_map(|h| index.get(h).map(|s| (h.clone(), s.clone())))
            .collect()
    }

    /// Per-host offers in the requested scope.
    #[must_use]
    pub fn get_offers(&self, scope: OfferScope) -> HashMap<String, HashMap<OfferId, Offer>> {
        self.snapshot()
            .into_iter()
            .map(|s| (s.hostname().to_owned(), s.get_offers(scope)))
            .collect()
    }

    /// Offers currently tracked by the expiry index.
    #[must_use]
    pub fn timed_offer_count(&self) -> usize {
        self.timed_offers.len()
    }

    /// Empties the pool on leadership loss.
    pub fn clear(&self) {
        self.host_index.write().clear();
        self.timed_offers.clear();
        self.held_index.clear();
        info!("offer pool cleared");
    }

    /// Publishes pool gauges.
    pub fn refresh_gauge_maps(&self) {
        let mut ready = 0u64;
        let mut placing = 0u64;
        for summary in self.snapshot() {
            match summary.status() {
                HostStatus::Ready => ready += 1,
                HostStatus::Placing => placing += 1,
            }
        }
        gauge!("drover_pool_ready_hosts").set(ready as f64);
        gauge!("drover_pool_placing_hosts").set(placing as f64);
        gauge!("drover_pool_offers").set(self.timed_offers.len() as f64);
        gauge!("drover_pool_held_tasks").set(self.held_index.len() as f64);
    }

    /// The ranker used for placement walks.
    #[must_use]
    pub fn ranker(&self) -> Arc<dyn Ranker> {
        self.ranker.clone()
    }

    /// Snapshot of the host index for ranking refresh.
    #[must_use]
    pub fn host_index_snapshot(&self) -> HashMap<String, Arc<HostSummary>> {
        self.host_index.read().clone()
    }

    fn ranked_host_summary_list(
        &self,
        hint: RankHint,
        index: &HashMap<String, Arc<HostSummary>>,
    ) -> Vec<Arc<HostSummary>> {
        match hint {
            RankHint::Invalid => self.ranker.ranked_host_list(index),
            RankHint::LeastAvailableFirst => ranking::defrag_order(index.values().cloned().collect()),
            RankHint::MostAvailableFirst => {
                let mut ranked = ranking::defrag_order(index.values().cloned().collect());
                ranked.reverse();
                ranked
            }
            RankHint::Random => {
                let mut candidates: Vec<Arc<HostSummary>> = index.values().cloned().collect();
                candidates.shuffle(&mut *self.shuffle_rng.lock());
                candidates
            }
        }
    }

    fn lookup(&self, hostname: &str) -> Option<Arc<HostSummary>> {
        self.host_index.read().get(hostname).cloned()
    }

    /// Looks up or creates the summary for a hostname. The write lock is
    /// held only for the insert.
    fn summary_for(&self, hostname: &str) -> Arc<HostSummary> {
        if let Some(summary) = self.lookup(hostname) {
            return summary;
        }
        let mut index = self.host_index.write();
        index
            .entry(hostname.to_owned())
            .or_insert_with(|| {
                Arc::new(HostSummary::new(
                    hostname,
                    self.placing_timeout,
                    self.held_timeout,
                    self.slack_types.clone(),
                ))
            })
            .clone()
    }

    fn snapshot(&self) -> Vec<Arc<HostSummary>> {
        self.host_index.read().values().cloned().collect()
    }

    async fn decline_to_master(&self, offer_ids: Vec<OfferId>) -> Result<()> {
        self.master
            .call(MasterCall::Decline {
                framework_id: self.framework.framework_id(),
                stream_id: self.framework.stream_id(),
                offer_ids,
            })
            .await
    }
}

fn epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
