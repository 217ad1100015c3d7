//! Wire protocol types for drover inter-component communication.
//!
//! This crate defines the messages exchanged between the host manager and
//! its two peers, serialised with rkyv:
//!
//! - **Master → host manager**: resource offers, rescinds, task status
//!   updates (`MasterEvent`)
//! - **Host manager → master**: decline, launch, kill, shutdown and
//!   offer-operation calls (`MasterCall`)
//! - **Host manager → watch subscribers**: per-host offer and placement
//!   events (`HostEvent`)
//!
//! # Wire Format
//!
//! Every message travels as one frame: an eight-byte header followed by
//! the rkyv-serialised body. The header opens with a two-byte magic so
//! a reader joining a stream mid-frame fails fast instead of
//! misreading body bytes as a length.
//!
//! ```text
//! offset   0    1    2    3    4    5    6    7    8 ..
//!        +----+----+----+----+----+----+----+----+--------------
//!        | 'D'| 'R'| ver|kind|   body length, BE | rkyv body ..
//!        +----+----+----+----+----+----+----+----+--------------
//! ```

pub mod codec;
mod error;
mod event;
mod filter;
mod master;
mod offer;
mod types;

pub use codec::{
    Codec, FrameHeader, MessageType, CURRENT_VERSION, FRAME_HEADER_SIZE, FRAME_MAGIC,
    MAX_MESSAGE_SIZE,
};
pub use error::ProtocolError;
pub use event::{HostEvent, HostEventKind};
pub use filter::{
    FilterHint, HostFilter, HostFilterResult, HostHint, LabelConstraint, LabelCondition,
    QuantityControl, RankHint, ResourceConstraint, ResourceSpec,
};
pub use master::{
    MasterCall, MasterEvent, OfferOperation, TaskSpec, TaskState, TaskStatusUpdate, VolumeSpec,
};
pub use offer::{
    Attribute, DiskInfo, Label, Offer, PortRange, Reservation, Resource, Unavailability,
    UNRESERVED_ROLE,
};
pub use types::{AgentId, FrameworkId, OfferId, StreamId, TaskId};

/// Protocol version constants.
pub mod version {
    /// Current protocol version.
    pub const CURRENT: u8 = 1;

    /// Minimum supported protocol version.
    pub const MIN_SUPPORTED: u8 = 1;
}
