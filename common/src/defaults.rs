use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operator-facing defaults served by the daemon to pre-fill the schedule form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Fill missing inputs from the values below instead of leaving them empty.
    #[serde(default)]
    pub prefill: bool,
    #[serde(default = "default_input_path")]
    pub input_path: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_schedule_delay")]
    pub schedule_delay_secs: u64,
}

fn default_input_path() -> PathBuf { PathBuf::from("debug_data.txt") }
fn default_output_dir() -> PathBuf { PathBuf::from("debug_results") }
fn default_config_path() -> PathBuf { PathBuf::from("debug_probe.json") }
fn default_schedule_delay() -> u64 { 5 }

impl Default for Defaults {
    fn default() -> Self {
        Self {
            prefill: false,
            input_path: default_input_path(),
            output_dir: default_output_dir(),
            config_path: default_config_path(),
            schedule_delay_secs: default_schedule_delay(),
        }
    }
}
