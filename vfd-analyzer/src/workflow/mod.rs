//! Analysis workflow: job coordination and progress streaming

pub mod coordinator;
pub mod progress;

pub use coordinator::{
    Admission, CoordinatorError, JobCoordinator, JobOutput, PipelineServices, Submission,
    VideoInput,
};
pub use progress::{ProgressBroadcaster, ProgressEvent, ProgressSubscription};
