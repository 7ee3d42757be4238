use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScheduleError};

/// One pipeline run: what to process and when to start it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub target_time: NaiveDateTime,
    pub input_path: PathBuf,
    pub config_path: PathBuf,
    pub output_path: PathBuf,
}

impl JobSpec {
    pub fn new(
        target_time: NaiveDateTime,
        input_path: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target_time,
            input_path: input_path.into(),
            config_path: config_path.into(),
            output_path: output_path.into(),
        }
    }

    /// Checks that every path is set and that the target lies strictly after `now`.
    ///
    /// Paths are not checked for existence; that is the pipeline's business.
    pub fn validate(&self, now: NaiveDateTime) -> Result<()> {
        let paths = [
            ("input file", &self.input_path),
            ("configuration file", &self.config_path),
            ("output directory", &self.output_path),
        ];
        for (label, path) in paths {
            if is_unset(path) {
                return Err(ScheduleError::Validation(format!("{} is not set", label)));
            }
        }

        if self.target_time <= now {
            return Err(ScheduleError::Validation(format!(
                "scheduled time {} has already passed",
                self.target_time.format("%Y-%m-%d %H:%M:%S")
            )));
        }

        Ok(())
    }

    pub fn remaining(&self, now: NaiveDateTime) -> Duration {
        self.target_time - now
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.target_time
    }
}

fn is_unset(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Idle,
    Armed,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Armed => "armed",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Result of a single pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success(String),
    Failure(String),
}

impl Outcome {
    /// The terminal status this outcome puts the scheduler in.
    pub fn status(&self) -> Status {
        match self {
            Outcome::Success(_) => Status::Completed,
            Outcome::Failure(_) => Status::Failed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(message) | Outcome::Failure(message) => message,
        }
    }
}
