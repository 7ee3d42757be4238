use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::defaults::Defaults;
use crate::error::ScheduleError;
use crate::job::{JobSpec, Status};

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Schedule(JobSpec),
    Cancel,
    Status,
    Defaults,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Error(String),
    Scheduled(JobSpec),
    Rejected(ScheduleError),
    Cancelled(CancelOutcome),
    Status(StatusReport),
    Defaults(Defaults),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    /// The pending job was dropped before it started.
    Cancelled,
    /// The pipeline had already started; it keeps running to completion.
    AlreadyRunning,
    NothingScheduled,
}

/// Snapshot of the scheduler for countdown displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: Status,
    pub job: Option<JobSpec>,
    pub remaining_secs: Option<i64>,
    pub last_run: Option<LastRun>,
}

/// How the most recent job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub status: Status,
    pub message: String,
    pub finished_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn schedule_request_wire_shape() {
        let target = NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        let req = Request::Schedule(JobSpec::new(target, "data.dat", "probe.json", "results"));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["Schedule"]["target_time"], "2026-10-17T02:00:00");
        assert_eq!(value["Schedule"]["config_path"], "probe.json");

        let unit: Request = serde_json::from_str("\"Cancel\"").unwrap();
        assert!(matches!(unit, Request::Cancel));
    }

    #[test]
    fn rejection_carries_error_kind() {
        let resp = Response::Rejected(ScheduleError::AlreadyScheduled(Status::Armed));
        let line = serde_json::to_string(&resp).unwrap();
        match serde_json::from_str::<Response>(&line).unwrap() {
            Response::Rejected(ScheduleError::AlreadyScheduled(Status::Armed)) => {}
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
