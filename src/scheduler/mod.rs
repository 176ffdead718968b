pub mod batch;
pub mod job;
pub mod matcher;
pub mod queue;

pub use batch::{
    BatchEngine, BatchProposal, BatchRequest, BatchState, ProposalPayload, RunReport, TargetContext,
};
pub use job::{Job, JobPatch, JobRequest, JobState, Origin, OriginKind};
pub use matcher::{find_matching_containers, MatchReport, MatchedContainer};
pub use queue::{Queue, QueueStatistics};
