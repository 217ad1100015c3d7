//! Configuration types for the host manager.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Host manager configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostMgrConfig {
    /// Diagnostics HTTP API.
    pub api: ApiConfig,
    /// Master connection.
    pub master: MasterConfig,
    /// Offer pool behaviour.
    pub offer_pool: OfferPoolConfig,
    /// Bin-packing ranker.
    pub bin_packing: BinPackingConfig,
    /// Outbound task-control rate limiting.
    pub task_control: TaskControlConfig,
    /// Watch stream sizing.
    pub watch: WatchConfig,
}

/// Diagnostics API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5292),
        }
    }
}

/// Master connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Endpoint for outbound calls and the event stream.
    pub endpoint: String,
    /// Framework registration id presented on every call.
    pub framework_id: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5050".to_owned(),
            framework_id: "drover".to_owned(),
        }
    }
}

/// Offer pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfferPoolConfig {
    /// How long an unreserved offer stays in the pool before expiry.
    #[serde(with = "serde_duration_secs")]
    pub offer_hold_time: Duration,
    /// Period of the offer expiry sweep.
    #[serde(with = "serde_duration_secs")]
    pub offer_pruning_period: Duration,
    /// How long a host may sit in Placing before auto-reverting to Ready.
    #[serde(with = "serde_duration_secs")]
    pub host_placing_offer_status_timeout: Duration,
    /// How long a host hold for a task lasts.
    #[serde(with = "serde_duration_secs")]
    pub host_held_status_timeout: Duration,
    /// Period of the held-host expiry sweep.
    #[serde(with = "serde_duration_secs")]
    pub held_host_pruning_period: Duration,
    /// Resource types on which hosts are exclusive.
    pub scarce_resource_types: Vec<String>,
    /// Resource types that may be offered as revocable.
    pub slack_resource_types: Vec<String>,
}

impl Default for OfferPoolConfig {
    fn default() -> Self {
        Self {
            offer_hold_time: Duration::from_secs(300),
            offer_pruning_period: Duration::from_secs(30),
            host_placing_offer_status_timeout: Duration::from_secs(120),
            host_held_status_timeout: Duration::from_secs(180),
            held_host_pruning_period: Duration::from_secs(60),
            scarce_resource_types: vec!["gpus".to_owned()],
            slack_resource_types: vec!["cpus".to_owned()],
        }
    }
}

/// Bin-packing ranker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinPackingConfig {
    /// Ranker name ("DeFrag", "FirstFit", "LoadAware").
    pub ranker: String,
    /// Period of the ranking refresh.
    #[serde(with = "serde_duration_secs")]
    pub refresh_interval: Duration,
}

impl Default for BinPackingConfig {
    fn default() -> Self {
        Self {
            ranker: crate::ranking::DE_FRAG.to_owned(),
            refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Token bucket for outbound kill/shutdown calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskControlConfig {
    /// Sustained calls per second.
    pub requests_per_second: u32,
    /// Burst allowance.
    pub burst_size: u32,
}

impl Default for TaskControlConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

/// Watch stream configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Per-subscriber event buffer; overrun disconnects the subscriber.
    pub subscriber_buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_size: 1024,
        }
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
