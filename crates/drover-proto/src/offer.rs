//! Resource offer types pushed by the cluster master.

use rkyv::{Archive, Deserialize, Serialize};

use crate::types::{AgentId, OfferId};

/// Role marker for unreserved resources.
pub const UNRESERVED_ROLE: &str = "*";

/// A time-bounded promise from the master that a specific agent has
/// specific resources available to this framework.
///
/// Offers are immutable once received; the host manager never mutates
/// them, only moves them between per-host maps.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Offer {
    /// Unique offer identifier.
    pub id: OfferId,
    /// Hostname of the agent the offer is for.
    pub hostname: String,
    /// Identifier of the backing agent.
    pub agent_id: AgentId,
    /// Typed resources carried by the offer.
    pub resources: Vec<Resource>,
    /// Host attributes advertised alongside the offer.
    pub attributes: Vec<Attribute>,
    /// Scheduled maintenance window, if the host has one planned.
    pub unavailability: Option<Unavailability>,
}

impl Offer {
    /// Returns true if any resource in the offer carries a reservation
    /// for a non-default role.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.resources
            .iter()
            .any(|r| r.role != UNRESERVED_ROLE && r.reservation.is_some())
    }

    /// Returns true if any resource carries persistent-disk info.
    #[must_use]
    pub fn has_persistent_volume(&self) -> bool {
        self.resources.iter().any(|r| r.disk.is_some())
    }
}

/// A single typed resource within an offer.
///
/// Scalar resources (cpus, mem, disk, gpus) use `scalar`; the ports
/// resource uses `ranges`.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Resource {
    /// Resource name ("cpus", "mem", "disk", "gpus", "ports").
    pub name: String,
    /// Scalar amount; zero for range resources.
    pub scalar: f64,
    /// Port ranges; empty for scalar resources.
    pub ranges: Vec<PortRange>,
    /// Role the resource is offered under. `"*"` means unreserved.
    pub role: String,
    /// Reservation metadata when the resource is role-reserved.
    pub reservation: Option<Reservation>,
    /// Persistent-disk metadata, present on volume-backed disk resources.
    pub disk: Option<DiskInfo>,
    /// True when the resource is revocable (reclaimable by the master
    /// at short notice).
    pub revocable: bool,
}

impl Resource {
    /// Creates an unreserved, non-revocable scalar resource.
    #[must_use]
    pub fn scalar(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            scalar: amount,
            ranges: Vec::new(),
            role: UNRESERVED_ROLE.to_owned(),
            reservation: None,
            disk: None,
            revocable: false,
        }
    }

    /// Creates an unreserved ports resource from inclusive ranges.
    #[must_use]
    pub fn ports(ranges: Vec<PortRange>) -> Self {
        Self {
            name: "ports".to_owned(),
            scalar: 0.0,
            ranges,
            role: UNRESERVED_ROLE.to_owned(),
            reservation: None,
            disk: None,
            revocable: false,
        }
    }

    /// Number of ports covered by this resource's ranges.
    #[must_use]
    pub fn port_count(&self) -> u32 {
        self.ranges.iter().map(PortRange::len).sum()
    }
}

/// An inclusive port range `[begin, end]`.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub begin: u32,
    pub end: u32,
}

impl PortRange {
    /// Number of ports in the range.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.begin) + 1
    }

    /// Ranges are never empty; a single port is `begin == end`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Reservation metadata attached to a role-reserved resource.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Labels identifying the reservation owner.
    pub labels: Vec<Label>,
}

/// A key/value label.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// Persistent-disk metadata on a reserved disk resource.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    /// Identifier of the persistent volume.
    pub persistence_id: String,
}

/// A host attribute advertised by the agent (e.g. rack, zone, sku).
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A scheduled maintenance window for the offering host.
///
/// Timestamps are nanoseconds since the Unix epoch, matching the
/// master's clock.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailability {
    /// Window start.
    pub start_nanos: i64,
    /// Window length; `None` means indefinite.
    pub duration_nanos: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_len() {
        let r = PortRange { begin: 1, end: 2 };
        assert_eq!(r.len(), 2);
        let single = PortRange { begin: 31_000, end: 31_000 };
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn reserved_detection() {
        let mut offer = Offer {
            id: OfferId::from("o1"),
            hostname: "host-0".to_owned(),
            agent_id: AgentId::from("agent-0"),
            resources: vec![Resource::scalar("cpus", 1.0)],
            attributes: vec![],
            unavailability: None,
        };
        assert!(!offer.is_reserved());

        offer.resources.push(Resource {
            role: "drover".to_owned(),
            reservation: Some(Reservation { labels: vec![] }),
            ..Resource::scalar("mem", 512.0)
        });
        assert!(offer.is_reserved());
    }
}
