use common::{Defaults, Request, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::scheduler::Scheduler;

/// Accepts clients forever; each connection speaks newline-delimited JSON.
pub async fn serve(
    listener: UnixListener,
    scheduler: Arc<Scheduler>,
    defaults: Arc<Defaults>,
) -> anyhow::Result<()> {
    loop {
        let (socket, _) = listener.accept().await?;
        let scheduler = scheduler.clone();
        let defaults = defaults.clone();
        tokio::spawn(async move {
            handle_connection(socket, &scheduler, &defaults).await;
        });
    }
}

async fn handle_connection(socket: UnixStream, scheduler: &Scheduler, defaults: &Defaults) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                log::error!("failed to read from socket; err = {:?}", e);
                return;
            }
        };

        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                log::debug!("Received request: {:?}", req);
                handle_request(scheduler, defaults, req).await
            }
            Err(e) => {
                log::error!("failed to deserialize request; err = {:?}", e);
                Response::Error(format!("Malformed request: {}", e))
            }
        };

        let mut resp_bytes = match serde_json::to_vec(&resp) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("failed to serialize response; err = {:?}", e);
                return;
            }
        };
        resp_bytes.push(b'\n');

        if let Err(e) = writer.write_all(&resp_bytes).await {
            log::error!("failed to write to socket; err = {:?}", e);
            return;
        }
    }
}

pub async fn handle_request(scheduler: &Scheduler, defaults: &Defaults, req: Request) -> Response {
    match req {
        Request::Schedule(job) => match scheduler.schedule(job) {
            Ok(job) => Response::Scheduled(job),
            Err(e) => {
                log::warn!("Schedule request rejected: {}", e);
                Response::Rejected(e)
            }
        },
        Request::Cancel => Response::Cancelled(scheduler.cancel().await),
        Request::Status => Response::Status(scheduler.status_report()),
        Request::Defaults => Response::Defaults(defaults.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ExecutionAdapter;
    use crate::clock::{Clock, SystemClock};
    use common::{CancelOutcome, JobSpec, ScheduleError, Status};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Noop;

    impl ExecutionAdapter for Noop {
        fn execute(&self, _job: &JobSpec) -> anyhow::Result<String> {
            Ok("done".to_string())
        }
    }

    fn scheduler() -> Scheduler {
        let (scheduler, _events) =
            Scheduler::new(Arc::new(Noop), Arc::new(SystemClock), Duration::from_millis(10));
        scheduler
    }

    fn future_job() -> JobSpec {
        JobSpec::new(
            SystemClock.now() + chrono::Duration::hours(1),
            "continuous.dat",
            "probe.json",
            "results",
        )
    }

    #[tokio::test]
    async fn schedule_status_cancel_round() {
        let scheduler = scheduler();
        let defaults = Defaults::default();
        let job = future_job();

        match handle_request(&scheduler, &defaults, Request::Schedule(job.clone())).await {
            Response::Scheduled(accepted) => assert_eq!(accepted, job),
            other => panic!("unexpected response: {:?}", other),
        }

        match handle_request(&scheduler, &defaults, Request::Schedule(future_job())).await {
            Response::Rejected(ScheduleError::AlreadyScheduled(Status::Armed)) => {}
            other => panic!("unexpected response: {:?}", other),
        }

        match handle_request(&scheduler, &defaults, Request::Status).await {
            Response::Status(report) => {
                assert_eq!(report.status, Status::Armed);
                assert_eq!(report.job, Some(job));
                assert!(report.remaining_secs.unwrap() > 3500);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        match handle_request(&scheduler, &defaults, Request::Cancel).await {
            Response::Cancelled(CancelOutcome::Cancelled) => {}
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(scheduler.status_report().status, Status::Idle);
    }

    #[tokio::test]
    async fn socket_speaks_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("futuresort.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let defaults = Defaults { prefill: true, ..Defaults::default() };
        tokio::spawn(serve(listener, Arc::new(scheduler()), Arc::new(defaults)));

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"\"Defaults\"\nnot json\n").await.unwrap();

        let first: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        match first {
            Response::Defaults(d) => assert!(d.prefill),
            other => panic!("unexpected response: {:?}", other),
        }
        let second: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(second, Response::Error(_)));
    }
}
