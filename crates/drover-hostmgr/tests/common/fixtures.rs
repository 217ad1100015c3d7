//! Test fixtures for host manager integration tests.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use drover_hostmgr::{
    ranker_by_name, EventPublisher, FrameworkInfo, HostMgrError, OfferPool, OfferPoolConfig,
    RecordingMasterClient,
};
use drover_proto::{
    AgentId, Attribute, DiskInfo, FrameworkId, HostFilter, Offer, OfferId, PortRange,
    QuantityControl, Reservation, Resource, Unavailability,
};

/// Pool plus the collaborators tests observe.
pub struct PoolHarness {
    pub pool: Arc<OfferPool>,
    pub master: Arc<RecordingMasterClient>,
    pub events: Arc<EventPublisher>,
}

/// Builds a pool with default timeouts.
pub fn pool_harness() -> PoolHarness {
    pool_harness_with(OfferPoolConfig::default())
}

/// Builds a pool with the given offer pool configuration.
pub fn pool_harness_with(config: OfferPoolConfig) -> PoolHarness {
    let master = Arc::new(RecordingMasterClient::new());
    let framework = Arc::new(FrameworkInfo::new(FrameworkId::from("framework-1")));
    let events = Arc::new(EventPublisher::new(1024));
    let ranker = ranker_by_name("DeFrag").expect("DeFrag is registered");
    let pool = Arc::new(OfferPool::new(
        &config,
        master.clone(),
        framework,
        ranker,
        events.clone(),
    ));
    PoolHarness { pool, master, events }
}

/// Builder for test offers.
pub struct OfferBuilder {
    hostname: String,
    offer_id: String,
    cpu: f64,
    mem: f64,
    disk: f64,
    gpu: f64,
    ports: Vec<PortRange>,
    attributes: Vec<Attribute>,
    reserved: bool,
    volume_id: Option<String>,
    unavailability: Option<Unavailability>,
}

impl OfferBuilder {
    pub fn new(hostname: &str, offer_id: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            offer_id: offer_id.to_string(),
            cpu: 1.0,
            mem: 1.0,
            disk: 1.0,
            gpu: 0.0,
            ports: vec![],
            attributes: vec![],
            reserved: false,
            volume_id: None,
            unavailability: None,
        }
    }

    pub fn with_resources(mut self, cpu: f64, mem: f64, disk: f64, gpu: f64) -> Self {
        self.cpu = cpu;
        self.mem = mem;
        self.disk = disk;
        self.gpu = gpu;
        self
    }

    pub fn with_ports(mut self, begin: u32, end: u32) -> Self {
        self.ports.push(PortRange { begin, end });
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn reserved(mut self) -> Self {
        self.reserved = true;
        self
    }

    pub fn with_volume(mut self, volume_id: &str) -> Self {
        self.reserved = true;
        self.volume_id = Some(volume_id.to_string());
        self
    }

    /// Maintenance window starting `offset` from now (negative offsets
    /// via `unavailable_since`).
    pub fn unavailable_in(mut self, offset: Duration) -> Self {
        self.unavailability = Some(Unavailability {
            start_nanos: epoch_nanos() + offset.as_nanos() as i64,
            duration_nanos: None,
        });
        self
    }

    pub fn unavailable_since(mut self, ago: Duration) -> Self {
        self.unavailability = Some(Unavailability {
            start_nanos: epoch_nanos() - ago.as_nanos() as i64,
            duration_nanos: None,
        });
        self
    }

    pub fn build(self) -> Offer {
        let mut resources = vec![
            Resource::scalar("cpus", self.cpu),
            Resource::scalar("mem", self.mem),
            Resource::scalar("disk", self.disk),
        ];
        if self.gpu > 0.0 {
            resources.push(Resource::scalar("gpus", self.gpu));
        }
        if !self.ports.is_empty() {
            resources.push(Resource::ports(self.ports));
        }
        if self.reserved {
            for resource in &mut resources {
                resource.role = "drover".to_string();
                resource.reservation = Some(Reservation { labels: vec![] });
            }
            if let Some(volume_id) = &self.volume_id {
                resources.push(Resource {
                    role: "drover".to_string(),
                    reservation: Some(Reservation { labels: vec![] }),
                    disk: Some(DiskInfo {
                        persistence_id: volume_id.clone(),
                    }),
                    ..Resource::scalar("disk", 16.0)
                });
            }
        }
        Offer {
            id: OfferId(self.offer_id),
            hostname: self.hostname.clone(),
            agent_id: AgentId(format!("{}-agent", self.hostname)),
            resources,
            attributes: self.attributes,
            unavailability: self.unavailability,
        }
    }
}

/// A batch of plain offers for one host.
pub fn host_offers(hostname: &str, count: usize) -> Vec<Offer> {
    (0..count)
        .map(|i| OfferBuilder::new(hostname, &format!("{hostname}-offer-{i}")).build())
        .collect()
}

/// A filter claiming up to `max_hosts` hosts with no resource demands.
pub fn filter_for(max_hosts: u32) -> HostFilter {
    HostFilter {
        quantity: QuantityControl { max_hosts },
        ..HostFilter::default()
    }
}

/// Current wall clock in nanoseconds since the epoch.
pub fn epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Asserts the error is the invalid-claim kind.
pub fn assert_invalid_claim(err: &HostMgrError) {
    assert!(
        matches!(err, HostMgrError::InvalidClaim { .. }),
        "expected InvalidClaim, got {err}"
    );
}
