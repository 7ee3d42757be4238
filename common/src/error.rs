use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::Status;

/// Errors returned synchronously to whoever asked for a job to be scheduled.
///
/// Pipeline failures are not part of this enum: they are discovered on the
/// background task and reported as [`crate::Outcome::Failure`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ScheduleError {
    /// Incomplete inputs or a target time that is not in the future.
    #[error("Invalid job: {0}")]
    Validation(String),

    /// Only one job may be pending or running at a time.
    #[error("A job is already scheduled (status: {0})")]
    AlreadyScheduled(Status),

    /// A time preset that cannot be resolved.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The daemon is stopping and accepts no new jobs.
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
