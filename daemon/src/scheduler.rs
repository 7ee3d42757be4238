use common::{CancelOutcome, JobSpec, LastRun, Outcome, ScheduleError, Status, StatusReport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::adapter::ExecutionAdapter;
use crate::clock::Clock;

/// Status changes, in the order they happen. Terminal events are sent before the
/// scheduler returns to idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Armed(JobSpec),
    Running(JobSpec),
    Finished(JobSpec, Outcome),
    Cancelled(JobSpec),
}

impl SchedulerEvent {
    pub fn status(&self) -> Status {
        match self {
            SchedulerEvent::Armed(_) => Status::Armed,
            SchedulerEvent::Running(_) => Status::Running,
            SchedulerEvent::Finished(_, outcome) => outcome.status(),
            SchedulerEvent::Cancelled(_) => Status::Cancelled,
        }
    }
}

struct State {
    status: Status,
    active_job: Option<JobSpec>,
    stop_requested: bool,
    shutting_down: bool,
    last_run: Option<LastRun>,
}

/// Shared between the scheduler handle and its polling task.
struct Shared {
    state: Mutex<State>,
    adapter: Arc<dyn ExecutionAdapter>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    /// Woken every time a job settles and the scheduler is idle again.
    settled: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports a terminal event and resets to idle, under the same lock.
    fn settle(&self, state: &mut State, event: SchedulerEvent) {
        state.status = event.status();
        state.last_run = Some(LastRun {
            status: state.status,
            message: match &event {
                SchedulerEvent::Finished(_, outcome) => outcome.message().to_string(),
                _ => "Cancelled before start".to_string(),
            },
            finished_at: self.clock.now(),
        });
        let _ = self.events.send(event);

        state.status = Status::Idle;
        state.active_job = None;
        state.stop_requested = false;
        self.settled.notify_waiters();
    }
}

/// Holds at most one pending job and runs it once its target time has come.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                status: Status::Idle,
                active_job: None,
                stop_requested: false,
                shutting_down: false,
                last_run: None,
            }),
            adapter,
            clock,
            poll_interval,
            events,
            settled: Notify::new(),
        });
        let scheduler = Self {
            shared,
            worker: Mutex::new(None),
        };
        (scheduler, rx)
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts `job` and starts polling for its target time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, job: JobSpec) -> Result<JobSpec, ScheduleError> {
        let mut state = self.shared.lock();
        if state.shutting_down {
            return Err(ScheduleError::ShuttingDown);
        }
        if state.status != Status::Idle {
            return Err(ScheduleError::AlreadyScheduled(state.status));
        }
        job.validate(self.shared.clock.now())?;

        state.status = Status::Armed;
        state.active_job = Some(job.clone());
        state.stop_requested = false;
        let _ = self.shared.events.send(SchedulerEvent::Armed(job.clone()));
        log::info!(
            "Scheduled pipeline for {} (input: {})",
            job.target_time.format("%Y-%m-%d %H:%M:%S"),
            job.input_path.display()
        );

        // Stored before the state lock is released so cancel() always finds it.
        let handle = tokio::spawn(drive(self.shared.clone(), job.clone()));
        *self.worker() = Some(handle);
        drop(state);

        Ok(job)
    }

    /// Drops the pending job. Waits up to one polling interval for the poller to wind down.
    ///
    /// A pipeline that has already started is left alone.
    pub async fn cancel(&self) -> CancelOutcome {
        // Registered before the state is inspected so a settle in between is not missed.
        let settled = self.shared.settled.notified();
        let handle = {
            let mut state = self.shared.lock();
            match state.status {
                Status::Armed => {
                    state.stop_requested = true;
                    self.worker().take()
                }
                Status::Running => {
                    state.stop_requested = true;
                    log::warn!("Cancel requested while the pipeline is running; letting it finish");
                    return CancelOutcome::AlreadyRunning;
                }
                _ => return CancelOutcome::NothingScheduled,
            }
        };

        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    log::error!("Scheduler task ended abnormally: {}", e);
                }
            }
            // Another caller already owns the poller; wait for it to settle.
            None => settled.await,
        }
        CancelOutcome::Cancelled
    }

    pub fn status_report(&self) -> StatusReport {
        let state = self.shared.lock();
        let now = self.shared.clock.now();
        StatusReport {
            status: state.status,
            job: state.active_job.clone(),
            remaining_secs: state
                .active_job
                .as_ref()
                .map(|job| job.remaining(now).num_seconds().max(0)),
            last_run: state.last_run.clone(),
        }
    }

    /// Stops polling and waits for the background task, including a running pipeline.
    ///
    /// New jobs are rejected from here on.
    pub async fn shutdown(&self) {
        let handle = {
            let mut state = self.shared.lock();
            state.shutting_down = true;
            if state.status == Status::Running {
                log::info!("Waiting for the running pipeline to finish before exit");
            }
            state.stop_requested = true;
            self.worker().take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }
}

/// Polls until `job` is due or a stop is requested, then runs it once.
async fn drive(shared: Arc<Shared>, job: JobSpec) {
    loop {
        {
            let mut state = shared.lock();
            if state.stop_requested {
                log::info!("Scheduled pipeline cancelled");
                shared.settle(&mut state, SchedulerEvent::Cancelled(job));
                return;
            }
            if state.status == Status::Armed && job.is_due(shared.clock.now()) {
                state.status = Status::Running;
                let _ = shared.events.send(SchedulerEvent::Running(job.clone()));
                break;
            }
        }
        tokio::time::sleep(shared.poll_interval).await;
    }

    log::info!("Starting pipeline for {}", job.input_path.display());
    let adapter = shared.adapter.clone();
    let task_job = job.clone();
    let outcome = match tokio::task::spawn_blocking(move || adapter.execute(&task_job)).await {
        Ok(Ok(message)) => Outcome::Success(message),
        Ok(Err(e)) => Outcome::Failure(format!("{:#}", e)),
        Err(e) => Outcome::Failure(format!("Pipeline aborted: {}", e)),
    };

    match &outcome {
        Outcome::Success(message) => log::info!("Execution completed: {}", message),
        Outcome::Failure(reason) => log::error!("Error during execution: {}", reason),
    }

    let mut state = shared.lock();
    shared.settle(&mut state, SchedulerEvent::Finished(job, outcome));
}
