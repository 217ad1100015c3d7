//! Background sweeps: offer expiry, placing/held resets, ranking refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HostMgrConfig;
use crate::pool::OfferPool;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Handles to the periodic sweep tasks.
///
/// Sweeps take a time snapshot per tick and hand it to the pool, so the
/// pool operations stay testable with injected time. All sweeps stop on
/// leadership loss via [`BackgroundSweeps::stop`].
pub struct BackgroundSweeps {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundSweeps {
    /// Spawns the sweep loops.
    #[must_use]
    pub fn start(pool: Arc<OfferPool>, config: &HostMgrConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = vec![
            tokio::spawn(run_offer_pruner(
                pool.clone(),
                config.offer_pool.offer_pruning_period,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_placing_sweeper(
                pool.clone(),
                config.offer_pool.offer_pruning_period,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_held_sweeper(
                pool.clone(),
                config.offer_pool.held_host_pruning_period,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_ranking_refresher(
                pool,
                config.bin_packing.refresh_interval,
                shutdown.subscribe(),
            )),
        ];
        Self { shutdown, handles }
    }

    /// Stops all sweeps and waits for them to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("background sweeps stopped");
    }
}

/// Prunes expired offers and declines them to the master.
///
/// A failed decline is logged and backed off; the pruned offers are
/// already out of the pool, so the master simply re-offers them later.
async fn run_offer_pruner(pool: Arc<OfferPool>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    let mut backoff = BACKOFF_BASE;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (removed, valid) = pool.remove_expired_offers(Instant::now());
                pool.refresh_gauge_maps();
                debug!(removed = removed.len(), valid, "offer pruning sweep");
                if removed.is_empty() {
                    backoff = BACKOFF_BASE;
                    continue;
                }
                match pool.decline_offers(removed.into_keys().collect()).await {
                    Ok(()) => backoff = BACKOFF_BASE,
                    Err(err) => {
                        warn!(error = %err, "failed to decline pruned offers, backing off");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Reverts hosts with expired Placing status to Ready.
async fn run_placing_sweeper(pool: Arc<OfferPool>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reset = pool.reset_expired_placing_host_summaries(Instant::now());
                if !reset.is_empty() {
                    info!(hosts = reset.len(), "reset expired placing hosts");
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Drops expired host holds.
async fn run_held_sweeper(pool: Arc<OfferPool>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reset = pool.reset_expired_held_host_summaries(Instant::now());
                if !reset.is_empty() {
                    info!(hosts = reset.len(), "released expired host holds");
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Recomputes the bin-packing ranking.
async fn run_ranking_refresher(pool: Arc<OfferPool>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let index = pool.host_index_snapshot();
                pool.ranker().refresh_ranking(&index);
                debug!(hosts = index.len(), "ranking refreshed");
            }
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostMgrConfig;
    use crate::master::{FrameworkInfo, RecordingMasterClient};
    use crate::ranking;
    use crate::watch::EventPublisher;
    use drover_proto::{AgentId, FrameworkId, MasterCall, Offer, OfferId, Resource};

    fn pool_with_hold(hold: Duration) -> (Arc<OfferPool>, Arc<RecordingMasterClient>) {
        let master = Arc::new(RecordingMasterClient::new());
        let config = crate::config::OfferPoolConfig {
            offer_hold_time: hold,
            ..crate::config::OfferPoolConfig::default()
        };
        let pool = Arc::new(OfferPool::new(
            &config,
            master.clone(),
            Arc::new(FrameworkInfo::new(FrameworkId::from("fw"))),
            ranking::ranker_by_name(ranking::DE_FRAG).unwrap(),
            Arc::new(EventPublisher::new(64)),
        ));
        (pool, master)
    }

    fn offer(id: &str) -> Offer {
        Offer {
            id: OfferId::from(id),
            hostname: "agent-1".to_owned(),
            agent_id: AgentId::from("agent-1"),
            resources: vec![Resource::scalar("cpus", 1.0)],
            attributes: vec![],
            unavailability: None,
        }
    }

    #[tokio::test]
    async fn pruner_declines_expired_offers() {
        let (pool, master) = pool_with_hold(Duration::ZERO);
        pool.add_offers(vec![offer("o1"), offer("o2")]).await;
        assert_eq!(pool.timed_offer_count(), 2);

        let mut config = HostMgrConfig::default();
        config.offer_pool.offer_pruning_period = Duration::from_millis(20);
        config.offer_pool.held_host_pruning_period = Duration::from_millis(20);
        config.bin_packing.refresh_interval = Duration::from_millis(20);

        let sweeps = BackgroundSweeps::start(pool.clone(), &config);
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeps.stop().await;

        assert_eq!(pool.timed_offer_count(), 0);
        let declined: Vec<MasterCall> = master
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MasterCall::Decline { .. }))
            .collect();
        assert!(!declined.is_empty());
    }

    #[tokio::test]
    async fn sweeps_stop_cleanly() {
        let (pool, _master) = pool_with_hold(Duration::from_secs(300));
        let sweeps = BackgroundSweeps::start(pool, &HostMgrConfig::default());
        sweeps.stop().await;
    }
}
