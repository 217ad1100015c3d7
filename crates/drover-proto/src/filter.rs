//! Host filters sent by placement clients.

use rkyv::{Archive, Deserialize, Serialize};

/// A placement query against the offer pool.
///
/// The filter describes what a batch of tasks needs from a host; the
/// pool walks its ranked host list and returns up to
/// `quantity.max_hosts` hosts whose unreserved offers satisfy it.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HostFilter {
    /// How many hosts the caller wants.
    pub quantity: QuantityControl,
    /// Resource minimums the host must meet.
    pub resource_constraint: ResourceConstraint,
    /// Optional attribute constraint evaluated against host labels.
    pub scheduling_constraint: Option<LabelConstraint>,
    /// Placement hints; best effort only.
    pub hint: FilterHint,
}

/// Bounds on the number of hosts a query may claim.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantityControl {
    /// Maximum hosts to return; `0` means no limit.
    pub max_hosts: u32,
}

/// Resource minimums for a single host.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ResourceConstraint {
    /// Minimum scalar resources the host's unreserved offers must sum to.
    pub minimum: ResourceSpec,
    /// Minimum number of free ports.
    pub num_ports: u32,
    /// When set, revocable (slack) resources count toward the minimum.
    pub revocable: bool,
}

/// Scalar resource quantities in a filter.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSpec {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
}

/// Placement hints attached to a filter.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FilterHint {
    /// Hosts to try first, in order. Still subject to matching.
    pub host_hint: Vec<HostHint>,
    /// Preferred ordering of the candidate walk.
    pub rank_hint: RankHint,
}

/// A single preferred host.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostHint {
    pub hostname: String,
}

/// Candidate ordering requested by a filter.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RankHint {
    /// No preference; the pool's configured ranker decides.
    #[default]
    Invalid,
    /// Pack: walk hosts with the least available resources first.
    LeastAvailableFirst,
    /// Spread: walk hosts with the most available resources first.
    MostAvailableFirst,
    /// Shuffle the candidates.
    Random,
}

/// Outcome of matching one host against a filter.
///
/// Doubles as the bucket key in the per-query result tally.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFilterResult {
    /// Host satisfies the filter.
    Match,
    /// Host is already placing for another query.
    MismatchStatus,
    /// Scheduling constraint rejected the host.
    MismatchConstraints,
    /// Host carries GPUs but the filter requests none.
    MismatchGpu,
    /// Host resources or ports below the requested minimum.
    InsufficientResources,
    /// Host has no unreserved offers.
    NoOffer,
    /// Query already claimed its maximum number of hosts.
    MismatchMaxHostLimit,
}

impl HostFilterResult {
    /// Stable snake_case name, used for metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::MismatchStatus => "mismatch_status",
            Self::MismatchConstraints => "mismatch_constraints",
            Self::MismatchGpu => "mismatch_gpu",
            Self::InsufficientResources => "insufficient_offer_resources",
            Self::NoOffer => "no_offer",
            Self::MismatchMaxHostLimit => "mismatch_max_host_limit",
        }
    }
}

/// An attribute constraint over host labels.
///
/// Expressed as an expression tree: leaves compare the number of
/// occurrences of a label in the host's label bag against a requirement,
/// inner nodes combine sub-constraints.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(serialize_bounds(
    __S: rkyv::ser::Writer + rkyv::ser::Allocator,
    __S::Error: rkyv::rancor::Source,
))]
#[rkyv(deserialize_bounds(__D::Error: rkyv::rancor::Source))]
#[rkyv(bytecheck(
    bounds(
        __C: rkyv::validation::ArchiveContext,
    )
))]
pub enum LabelConstraint {
    /// All sub-constraints must hold.
    And(#[rkyv(omit_bounds)] Vec<LabelConstraint>),
    /// At least one sub-constraint must hold.
    Or(#[rkyv(omit_bounds)] Vec<LabelConstraint>),
    /// Occurrence-count comparison for one label.
    Label {
        key: String,
        value: String,
        condition: LabelCondition,
        requirement: u32,
    },
}

/// Comparison operator for a label-count requirement.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCondition {
    LessThan,
    Equal,
    GreaterThan,
}
