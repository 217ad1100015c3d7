//! Scalar resource arithmetic over offers.

use drover_proto::{Offer, OfferId, ResourceSpec};
use std::collections::HashMap;

/// Well-known resource names.
pub mod names {
    pub const CPUS: &str = "cpus";
    pub const MEM: &str = "mem";
    pub const DISK: &str = "disk";
    pub const GPUS: &str = "gpus";
    pub const PORTS: &str = "ports";
}

/// Which resources of an offer to include in a sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Non-revocable resources only.
    NonRevocable,
    /// Non-revocable plus revocable resources of slack types.
    WithRevocable,
    /// Everything, revocable or not. Used for ranking totals.
    All,
}

/// A scalar resource bundle.
///
/// Addition, subtraction and `contains` are total and component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Resources {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
}

impl Resources {
    /// Creates a resource bundle.
    #[must_use]
    pub const fn new(cpu: f64, mem: f64, disk: f64, gpu: f64) -> Self {
        Self { cpu, mem, disk, gpu }
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            cpu: self.cpu + other.cpu,
            mem: self.mem + other.mem,
            disk: self.disk + other.disk,
            gpu: self.gpu + other.gpu,
        }
    }

    /// Component-wise subtraction, clamped at zero.
    #[must_use]
    pub fn subtract_or_zero(&self, other: &Self) -> Self {
        Self {
            cpu: (self.cpu - other.cpu).max(0.0),
            mem: (self.mem - other.mem).max(0.0),
            disk: (self.disk - other.disk).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
        }
    }

    /// True when every component of `other` fits within `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.cpu >= other.cpu && self.mem >= other.mem && self.disk >= other.disk && self.gpu >= other.gpu
    }

    /// True when the bundle carries any GPUs.
    #[must_use]
    pub fn has_gpu(&self) -> bool {
        self.gpu > 0.0
    }

    /// True when every component is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpu == 0.0 && self.mem == 0.0 && self.disk == 0.0 && self.gpu == 0.0
    }

    /// Sums the scalar resources of one offer.
    #[must_use]
    pub fn from_offer(offer: &Offer, scope: Scope, slack_types: &[String]) -> Self {
        let mut sum = Self::default();
        for res in &offer.resources {
            let include = if res.revocable {
                match scope {
                    Scope::All => true,
                    Scope::WithRevocable => is_slack_resource_type(&res.name, slack_types),
                    Scope::NonRevocable => false,
                }
            } else {
                true
            };
            if !include {
                continue;
            }
            match res.name.as_str() {
                names::CPUS => sum.cpu += res.scalar,
                names::MEM => sum.mem += res.scalar,
                names::DISK => sum.disk += res.scalar,
                names::GPUS => sum.gpu += res.scalar,
                _ => {}
            }
        }
        sum
    }

    /// Sums the scalar resources across a map of offers.
    #[must_use]
    pub fn from_offers(offers: &HashMap<OfferId, Offer>, scope: Scope, slack_types: &[String]) -> Self {
        offers
            .values()
            .fold(Self::default(), |acc, o| acc.add(&Self::from_offer(o, scope, slack_types)))
    }
}

impl From<ResourceSpec> for Resources {
    fn from(spec: ResourceSpec) -> Self {
        Self {
            cpu: spec.cpu,
            mem: spec.mem,
            disk: spec.disk,
            gpu: spec.gpu,
        }
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu:{} mem:{} disk:{} gpu:{}",
            self.cpu, self.mem, self.disk, self.gpu
        )
    }
}

/// Total number of ports across a map of offers.
///
/// Ports are counted, not enumerated; specific-port selection happens on
/// the launch path.
#[must_use]
pub fn port_count(offers: &HashMap<OfferId, Offer>) -> u32 {
    offers
        .values()
        .flat_map(|o| o.resources.iter())
        .filter(|r| r.name == names::PORTS)
        .map(drover_proto::Resource::port_count)
        .sum()
}

/// True when `name` is configured as a slack (revocable-capable) type.
#[must_use]
pub fn is_slack_resource_type(name: &str, slack_types: &[String]) -> bool {
    slack_types.iter().any(|t| t.eq_ignore_ascii_case(name))
}
