//! Pluggable host ranking for placement walks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::scalar::{Resources, Scope};
use crate::summary::{HostSummary, OfferScope};

/// Ranker names accepted in configuration.
pub const DE_FRAG: &str = "DeFrag";
pub const FIRST_FIT: &str = "FirstFit";
pub const LOAD_AWARE: &str = "LoadAware";

/// Orders candidate hosts for a placement query.
///
/// Rankings are recommendations: the pool applies the filter's rank hint
/// on top. `refresh_ranking` runs on a timer; `ranked_host_list` must be
/// cheap enough for the placement path.
pub trait Ranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recomputes the internal ordering from the current host index.
    fn refresh_ranking(&self, index: &HashMap<String, Arc<HostSummary>>);

    /// Returns the ranked candidate list.
    fn ranked_host_list(&self, index: &HashMap<String, Arc<HostSummary>>) -> Vec<Arc<HostSummary>>;
}

/// Looks up a ranker implementation by its configured name.
#[must_use]
pub fn ranker_by_name(name: &str) -> Option<Arc<dyn Ranker>> {
    match name {
        DE_FRAG => Some(Arc::new(DeFrag::new())),
        FIRST_FIT => Some(Arc::new(FirstFit)),
        LOAD_AWARE => Some(Arc::new(LoadAware::new())),
        _ => None,
    }
}

/// Total offered resources of a summary, used as the ordering key.
fn offered_total(summary: &HostSummary) -> Resources {
    Resources::from_offers(&summary.get_offers(OfferScope::All), Scope::All, &[])
}

/// Ascending bin-packing order: GPUs dominate (scarce first), then cpu,
/// mem, disk.
fn defrag_cmp(a: &Resources, b: &Resources) -> Ordering {
    a.gpu
        .total_cmp(&b.gpu)
        .then(a.cpu.total_cmp(&b.cpu))
        .then(a.mem.total_cmp(&b.mem))
        .then(a.disk.total_cmp(&b.disk))
}

/// Sorts summaries least-available-first.
#[must_use]
pub fn defrag_order(mut summaries: Vec<Arc<HostSummary>>) -> Vec<Arc<HostSummary>> {
    summaries.sort_by(|a, b| defrag_cmp(&offered_total(a), &offered_total(b)));
    summaries
}

/// Least-available-first ranker, biasing placement toward packed hosts
/// so large tasks keep finding large holes.
pub struct DeFrag {
    cached: RwLock<Vec<Arc<HostSummary>>>,
}

impl DeFrag {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cached: RwLock::new(Vec::new()),
        }
    }
}

impl Default for DeFrag {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranker for DeFrag {
    fn name(&self) -> &'static str {
        DE_FRAG
    }

    fn refresh_ranking(&self, index: &HashMap<String, Arc<HostSummary>>) {
        let ranked = defrag_order(index.values().cloned().collect());
        *self.cached.write() = ranked;
    }

    fn ranked_host_list(&self, index: &HashMap<String, Arc<HostSummary>>) -> Vec<Arc<HostSummary>> {
        {
            let cached = self.cached.read();
            // Serve the cache while it still covers the index; new hosts
            // force a recompute rather than being invisible to placement.
            if !cached.is_empty() && cached.len() == index.len() {
                return cached.clone();
            }
        }
        let ranked = defrag_order(index.values().cloned().collect());
        *self.cached.write() = ranked.clone();
        ranked
    }
}

/// Insertion-order ranker; walks hosts as the index yields them.
pub struct FirstFit;

impl Ranker for FirstFit {
    fn name(&self) -> &'static str {
        FIRST_FIT
    }

    fn refresh_ranking(&self, _index: &HashMap<String, Arc<HostSummary>>) {}

    fn ranked_host_list(&self, index: &HashMap<String, Arc<HostSummary>>) -> Vec<Arc<HostSummary>> {
        index.values().cloned().collect()
    }
}

/// Most-available-first ranker, spreading load across empty hosts.
pub struct LoadAware {
    cached: RwLock<Vec<Arc<HostSummary>>>,
}

impl LoadAware {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cached: RwLock::new(Vec::new()),
        }
    }
}

impl Default for LoadAware {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranker for LoadAware {
    fn name(&self) -> &'static str {
        LOAD_AWARE
    }

    fn refresh_ranking(&self, index: &HashMap<String, Arc<HostSummary>>) {
        let mut ranked = defrag_order(index.values().cloned().collect());
        ranked.reverse();
        *self.cached.write() = ranked;
    }

    fn ranked_host_list(&self, index: &HashMap<String, Arc<HostSummary>>) -> Vec<Arc<HostSummary>> {
        {
            let cached = self.cached.read();
            if !cached.is_empty() && cached.len() == index.len() {
                return cached.clone();
            }
        }
        let mut ranked = defrag_order(index.values().cloned().collect());
        ranked.reverse();
        *self.cached.write() = ranked.clone();
        ranked
    }
}
