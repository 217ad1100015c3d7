//! Messages exchanged with the cluster master.

use rkyv::{Archive, Deserialize, Serialize};

use crate::offer::Offer;
use crate::types::{AgentId, FrameworkId, OfferId, StreamId, TaskId};

/// Events pushed by the master on the subscription stream.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MasterEvent {
    /// A batch of fresh resource offers.
    Offers(Vec<Offer>),
    /// An earlier offer is no longer valid.
    Rescind(OfferId),
    /// State change for a running task.
    TaskStatus(TaskStatusUpdate),
}

/// Calls sent to the master.
///
/// Every call carries the framework id and the stream id of the
/// subscription it was decided on; the master rejects calls from stale
/// streams after a failover.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MasterCall {
    /// Return offers unused; the master may re-offer them elsewhere.
    Decline {
        framework_id: FrameworkId,
        stream_id: StreamId,
        offer_ids: Vec<OfferId>,
    },
    /// Launch tasks against claimed offers.
    Launch {
        framework_id: FrameworkId,
        stream_id: StreamId,
        offer_ids: Vec<OfferId>,
        tasks: Vec<TaskSpec>,
    },
    /// Apply persistent-volume operations to reserved offers.
    OfferOperations {
        framework_id: FrameworkId,
        stream_id: StreamId,
        offer_ids: Vec<OfferId>,
        operations: Vec<OfferOperation>,
    },
    /// Kill a running task.
    Kill {
        framework_id: FrameworkId,
        stream_id: StreamId,
        task_id: TaskId,
        agent_id: Option<AgentId>,
    },
    /// Shut down an executor on an agent.
    Shutdown {
        framework_id: FrameworkId,
        stream_id: StreamId,
        executor_id: String,
        agent_id: AgentId,
    },
}

/// A persistent-volume operation on a reserved offer.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum OfferOperation {
    /// Create a persistent volume on reserved disk.
    Create { volume: VolumeSpec },
    /// Destroy a persistent volume, releasing the disk.
    Destroy { volume_id: String },
}

/// Persistent-volume parameters for a CREATE operation.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub volume_id: String,
    /// Path the volume is mounted at inside the container.
    pub container_path: String,
    /// Size in megabytes.
    pub size_mb: u64,
}

/// The subset of a task definition the master needs to launch it.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub name: String,
    /// Scalar resource demands.
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
    /// Specific ports requested, resolved against the claimed offers.
    pub ports: Vec<u32>,
}

/// A task state change reported by the master.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskStatusUpdate {
    pub task_id: TaskId,
    pub state: TaskState,
    /// Optional human-readable reason.
    pub message: Option<String>,
}

/// Task lifecycle states as reported by the master.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    /// True for states after which the task will never run again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed | Self::Lost)
    }
}
