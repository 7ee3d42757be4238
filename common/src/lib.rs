pub mod defaults;
pub mod error;
pub mod ipc;
pub mod job;
pub mod schedule;

pub use defaults::Defaults;
pub use error::ScheduleError;
pub use ipc::{CancelOutcome, LastRun, Request, Response, StatusReport};
pub use job::{JobSpec, Outcome, Status};
pub use schedule::{format_remaining, parse_time_spec, TimeSpec};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/futuresort.sock";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/futuresort/config.yaml";
