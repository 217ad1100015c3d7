//! Drover host manager - the offer pool and its placement state machine.
//!
//! The host manager mediates between resource offers pushed by the
//! cluster master and placement decisions made on behalf of tasks:
//!
//! - **Offer pool**: process-wide index of per-host summaries; entry
//!   point for ingest, rescind, decline, claim, return and launch
//! - **Host summary**: one host, one serial state machine
//!   (Ready → Placing → Ready/launched) with claim-id issuance
//! - **Matching and ranking**: filter evaluation and pluggable
//!   bin-packing order for placement walks
//! - **Sweeps**: offer expiry, placing/held timeouts, ranking refresh
//! - **Watch**: bounded per-subscriber host event streams
//!
//! # Architecture
//!
//! The pool lock guards only summary creation; every state transition
//! happens under the owning summary's mutex, and claim rounds serialise
//! at the Ready→Placing compare-and-swap, so placements targeting
//! disjoint hosts proceed fully in parallel.

pub mod api;
pub mod config;
pub mod constraints;
pub mod error;
pub mod master;
pub mod matcher;
pub mod pool;
pub mod ranking;
pub mod scalar;
pub mod service;
pub mod summary;
pub mod sweeper;
pub mod watch;

// Re-export main types
pub use config::{
    ApiConfig, BinPackingConfig, HostMgrConfig, MasterConfig, OfferPoolConfig, TaskControlConfig,
    WatchConfig,
};
pub use constraints::{EvaluateResult, Evaluator, LabelEvaluator, LabelValues};
pub use error::{HostMgrError, Result};
pub use master::{
    FrameworkInfo, FrameworkInfoProvider, MasterClient, RecordingMasterClient, TcpMasterClient,
};
pub use matcher::match_host_filter;
pub use pool::{HostOffer, OfferPool, TimedOffer};
pub use ranking::{ranker_by_name, DeFrag, FirstFit, LoadAware, Ranker};
pub use scalar::Resources;
pub use service::HostService;
pub use summary::{
    AddOfferOutcome, ClaimedOffers, HostStatus, HostSummary, OfferScope,
    UNAVAILABLE_OFFER_LOOKAHEAD,
};
pub use sweeper::BackgroundSweeps;
pub use watch::{EventPublisher, EventStream, WatchError};
