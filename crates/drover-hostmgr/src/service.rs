//! Downstream service surface for placement clients.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use drover_proto::{
    AgentId, HostFilter, HostFilterResult, MasterCall, OfferId, OfferOperation, TaskId, TaskSpec,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{info, warn};

use crate::config::TaskControlConfig;
use crate::error::{HostMgrError, Result};
use crate::master::{FrameworkInfoProvider, MasterClient};
use crate::pool::{HostOffer, OfferPool};
use crate::summary::{HostSummary, OfferScope};

/// The host service placement clients talk to.
///
/// Wraps the pool's claim lifecycle and the outbound master calls that
/// consume claims. Task-control calls (kill, executor shutdown) share a
/// token bucket; an empty bucket rejects with `ResourceExhausted` rather
/// than queueing.
pub struct HostService {
    pool: Arc<OfferPool>,
    master: Arc<dyn MasterClient>,
    framework: Arc<dyn FrameworkInfoProvider>,
    task_limiter: DefaultDirectRateLimiter,
}

impl HostService {
    #[must_use]
    pub fn new(
        pool: Arc<OfferPool>,
        master: Arc<dyn MasterClient>,
        framework: Arc<dyn FrameworkInfoProvider>,
        config: &TaskControlConfig,
    ) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            pool,
            master,
            framework,
            task_limiter: RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)),
        }
    }

    /// Claims hosts matching the filter for a placement round.
    pub fn acquire_host_offers(
        &self,
        filter: &HostFilter,
    ) -> Result<(Vec<HostOffer>, HashMap<HostFilterResult, u32>)> {
        let (matched, counts) = self.pool.claim_for_place(filter)?;
        Ok((matched.into_values().collect(), counts))
    }

    /// Launches tasks on a claimed host.
    ///
    /// The claim id must match the one issued at acquire time; a claim
    /// invalidated by release, expiry or a concurrent launch rejects
    /// with `InvalidClaim` or `Conflict`.
    pub async fn launch_tasks(
        &self,
        hostname: &str,
        claim_id: &str,
        tasks: Vec<TaskSpec>,
    ) -> Result<()> {
        if tasks.is_empty() {
            return Err(HostMgrError::InvalidInput("no tasks to launch".to_owned()));
        }
        let offers = self.pool.claim_for_launch(hostname, false, claim_id)?;
        let offer_ids: Vec<OfferId> = offers.into_keys().collect();
        info!(%hostname, tasks = tasks.len(), offers = offer_ids.len(), "launching tasks");
        self.master
            .call(MasterCall::Launch {
                framework_id: self.framework.framework_id(),
                stream_id: self.framework.stream_id(),
                offer_ids,
                tasks,
            })
            .await
    }

    /// Returns a claimed host's offers without launching.
    pub fn release_host_offers(&self, hostname: &str) {
        self.pool.return_unused_offers(hostname);
    }

    /// Applies persistent-volume operations to a host's reserved offers.
    ///
    /// A DESTROY evicts the reserved offer whose volume was consumed.
    pub async fn offer_operations(
        &self,
        hostname: &str,
        operations: Vec<OfferOperation>,
    ) -> Result<()> {
        if operations.is_empty() {
            return Err(HostMgrError::InvalidInput("no offer operations".to_owned()));
        }
        let summary = self.pool.get_host_summary(hostname)?;
        let reserved = summary.get_offers(OfferScope::Reserved);
        if reserved.is_empty() {
            return Err(HostMgrError::Conflict {
                hostname: hostname.to_owned(),
                reason: "host has no reserved offers".to_owned(),
            });
        }

        self.master
            .call(MasterCall::OfferOperations {
                framework_id: self.framework.framework_id(),
                stream_id: self.framework.stream_id(),
                offer_ids: reserved.keys().cloned().collect(),
                operations: operations.clone(),
            })
            .await?;

        for operation in operations {
            if let OfferOperation::Destroy { volume_id } = operation {
                let consumed: Vec<OfferId> = reserved
                    .iter()
                    .filter(|(_, offer)| {
                        offer
                            .resources
                            .iter()
                            .any(|r| r.disk.as_ref().is_some_and(|d| d.persistence_id == volume_id))
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                for offer_id in consumed {
                    self.pool.remove_reserved_offer(hostname, &offer_id);
                }
            }
        }
        Ok(())
    }

    /// Read-only host query for diagnostics.
    #[must_use]
    pub fn get_hosts_by_query(&self, hostnames: &[String]) -> HashMap<String, Arc<HostSummary>> {
        self.pool.get_host_summaries(hostnames)
    }

    /// Kills a task through the master; rate limited.
    pub async fn kill_task(&self, task_id: TaskId, agent_id: Option<AgentId>) -> Result<()> {
        self.task_limiter
            .check()
            .map_err(|_| HostMgrError::ResourceExhausted("task kill".to_owned()))?;
        warn!(%task_id, "killing task");
        self.master
            .call(MasterCall::Kill {
                framework_id: self.framework.framework_id(),
                stream_id: self.framework.stream_id(),
                task_id,
                agent_id,
            })
            .await
    }

    /// Shuts down an executor on an agent; rate limited.
    pub async fn shutdown_executor(&self, executor_id: String, agent_id: AgentId) -> Result<()> {
        self.task_limiter
            .check()
            .map_err(|_| HostMgrError::ResourceExhausted("executor shutdown".to_owned()))?;
        warn!(%executor_id, %agent_id, "shutting down executor");
        self.master
            .call(MasterCall::Shutdown {
                framework_id: self.framework.framework_id(),
                stream_id: self.framework.stream_id(),
                executor_id,
                agent_id,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfferPoolConfig;
    use crate::master::{FrameworkInfo, RecordingMasterClient};
    use crate::ranking;
    use crate::watch::EventPublisher;
    use drover_proto::{
        DiskInfo, FrameworkId, Offer, QuantityControl, Reservation, Resource,
    };

    struct Harness {
        service: HostService,
        pool: Arc<OfferPool>,
        master: Arc<RecordingMasterClient>,
    }

    fn harness(task_control: TaskControlConfig) -> Harness {
        let master = Arc::new(RecordingMasterClient::new());
        let framework = Arc::new(FrameworkInfo::new(FrameworkId::from("fw")));
        let pool = Arc::new(OfferPool::new(
            &OfferPoolConfig::default(),
            master.clone(),
            framework.clone(),
            ranking::ranker_by_name(ranking::DE_FRAG).unwrap(),
            Arc::new(EventPublisher::new(64)),
        ));
        let service = HostService::new(pool.clone(), master.clone(), framework, &task_control);
        Harness { service, pool, master }
    }

    fn offer(hostname: &str, id: &str) -> Offer {
        Offer {
            id: OfferId::from(id),
            hostname: hostname.to_owned(),
            agent_id: drover_proto::AgentId(format!("{hostname}-1")),
            resources: vec![Resource::scalar("cpus", 4.0), Resource::scalar("mem", 1024.0)],
            attributes: vec![],
            unavailability: None,
        }
    }

    fn volume_offer(hostname: &str, id: &str, volume_id: &str) -> Offer {
        let mut o = offer(hostname, id);
        o.resources = vec![Resource {
            role: "drover".to_owned(),
            reservation: Some(Reservation { labels: vec![] }),
            disk: Some(DiskInfo {
                persistence_id: volume_id.to_owned(),
            }),
            ..Resource::scalar("disk", 64.0)
        }];
        o
    }

    fn task(id: &str) -> TaskSpec {
        TaskSpec {
            task_id: TaskId::from(id),
            name: format!("job.{id}"),
            cpu: 1.0,
            mem: 128.0,
            disk: 0.0,
            gpu: 0.0,
            ports: vec![],
        }
    }

    fn one_host_filter() -> HostFilter {
        HostFilter {
            quantity: QuantityControl { max_hosts: 1 },
            ..HostFilter::default()
        }
    }

    #[tokio::test]
    async fn acquire_then_launch() {
        let h = harness(TaskControlConfig::default());
        h.pool.add_offers(vec![offer("agent-1", "o1")]).await;

        let (hosts, _) = h.service.acquire_host_offers(&one_host_filter()).unwrap();
        assert_eq!(hosts.len(), 1);
        let host = &hosts[0];

        h.service
            .launch_tasks(&host.hostname, &host.claim_id, vec![task("t1")])
            .await
            .unwrap();

        let launches: Vec<MasterCall> = h
            .master
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MasterCall::Launch { .. }))
            .collect();
        assert_eq!(launches.len(), 1);
        assert_eq!(h.pool.timed_offer_count(), 0);
    }

    #[tokio::test]
    async fn launch_with_stale_claim_fails() {
        let h = harness(TaskControlConfig::default());
        h.pool.add_offers(vec![offer("agent-1", "o1")]).await;

        let (hosts, _) = h.service.acquire_host_offers(&one_host_filter()).unwrap();
        let host = &hosts[0];

        // Releasing the host invalidates the claim.
        h.service.release_host_offers(&host.hostname);
        let err = h
            .service
            .launch_tasks(&host.hostname, &host.claim_id, vec![task("t1")])
            .await
            .unwrap_err();
        assert!(matches!(err, HostMgrError::InvalidClaim { .. }));

        // Re-acquire with a wrong claim id.
        let (hosts, _) = h.service.acquire_host_offers(&one_host_filter()).unwrap();
        let err = h
            .service
            .launch_tasks(&hosts[0].hostname, "bogus-claim", vec![task("t1")])
            .await
            .unwrap_err();
        assert!(matches!(err, HostMgrError::InvalidClaim { .. }));
    }

    #[tokio::test]
    async fn launch_requires_tasks() {
        let h = harness(TaskControlConfig::default());
        let err = h
            .service
            .launch_tasks("agent-1", "claim", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, HostMgrError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn destroy_operation_evicts_reserved_offer() {
        let h = harness(TaskControlConfig::default());
        h.pool
            .add_offers(vec![volume_offer("agent-1", "r1", "vol-1")])
            .await;

        h.service
            .offer_operations(
                "agent-1",
                vec![OfferOperation::Destroy {
                    volume_id: "vol-1".to_owned(),
                }],
            )
            .await
            .unwrap();

        let summary = h.pool.get_host_summary("agent-1").unwrap();
        assert!(summary.get_offers(OfferScope::Reserved).is_empty());
        assert_eq!(h.pool.timed_offer_count(), 0);
    }

    #[tokio::test]
    async fn offer_operations_require_reserved_offers() {
        let h = harness(TaskControlConfig::default());
        h.pool.add_offers(vec![offer("agent-1", "o1")]).await;

        let err = h
            .service
            .offer_operations(
                "agent-1",
                vec![OfferOperation::Destroy {
                    volume_id: "vol-1".to_owned(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostMgrError::Conflict { .. }));
    }

    #[tokio::test]
    async fn task_control_is_rate_limited() {
        let h = harness(TaskControlConfig {
            requests_per_second: 1,
            burst_size: 1,
        });

        h.service
            .kill_task(TaskId::from("t1"), None)
            .await
            .unwrap();
        let err = h
            .service
            .kill_task(TaskId::from("t2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HostMgrError::ResourceExhausted(_)));

        let err = h
            .service
            .shutdown_executor("exec-1".to_owned(), drover_proto::AgentId::from("agent-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostMgrError::ResourceExhausted(_)));
    }
}
