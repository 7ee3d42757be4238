use anyhow::{anyhow, bail, Context, Result};
use common::JobSpec;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use crate::config::PipelineConfig;

/// Boundary between the scheduler and whatever does the actual processing.
pub trait ExecutionAdapter: Send + Sync + 'static {
    /// Runs the job to completion on the calling thread.
    fn execute(&self, job: &JobSpec) -> Result<String>;
}

/// Probe (device configuration) file. Only the channel layout matters here.
#[derive(Debug, Deserialize)]
struct Probe {
    n_chan: Option<u64>,
    #[serde(rename = "chanMap")]
    chan_map: Option<Vec<Value>>,
}

impl Probe {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read probe file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse probe file: {:?}", path))
    }

    fn channel_count(&self) -> Result<u64> {
        self.n_chan
            .or_else(|| self.chan_map.as_ref().map(|map| map.len() as u64))
            .ok_or_else(|| anyhow!("Probe defines neither n_chan nor chanMap"))
    }
}

/// Derived probe fields win over anything configured by hand.
fn merge_settings(
    base: &BTreeMap<String, Value>,
    probe: &Probe,
) -> Result<BTreeMap<String, Value>> {
    let mut settings = base.clone();
    settings.insert("n_chan_bin".to_string(), Value::from(probe.channel_count()?));
    Ok(settings)
}

/// Runs the external sorting pipeline as a child process.
///
/// Arguments may reference `{input}`, `{config}`, `{output}` and `{settings}`; the latter is
/// the merged settings JSON written into the output directory before launch.
pub struct PipelineAdapter {
    command: String,
    args: Vec<String>,
    settings: BTreeMap<String, Value>,
    settings_file: String,
}

impl PipelineAdapter {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            settings: config.settings.clone(),
            settings_file: config.settings_file.clone(),
        }
    }

    fn expand(&self, arg: &str, job: &JobSpec, settings_path: &Path) -> String {
        arg.replace("{input}", &job.input_path.to_string_lossy())
            .replace("{config}", &job.config_path.to_string_lossy())
            .replace("{output}", &job.output_path.to_string_lossy())
            .replace("{settings}", &settings_path.to_string_lossy())
    }
}

impl ExecutionAdapter for PipelineAdapter {
    fn execute(&self, job: &JobSpec) -> Result<String> {
        let probe = Probe::load(&job.config_path)?;
        let settings = merge_settings(&self.settings, &probe)?;

        fs::create_dir_all(&job.output_path)
            .with_context(|| format!("Failed to create output directory: {:?}", job.output_path))?;
        let settings_path = job.output_path.join(&self.settings_file);
        fs::write(&settings_path, serde_json::to_vec_pretty(&settings)?)
            .with_context(|| format!("Failed to write settings: {:?}", settings_path))?;

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| self.expand(arg, job, &settings_path))
            .collect();

        log::info!("Launching pipeline: {} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .with_context(|| format!("Failed to spawn pipeline: {}", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::info!(
            target: "pipeline_output",
            "Input: {}\nStdout:\n{}\nStderr:\n{}",
            job.input_path.display(),
            stdout,
            stderr
        );

        if !output.status.success() {
            let last_line = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no error output");
            bail!("{} exited with {}: {}", self.command, output.status, last_line);
        }

        Ok(format!("{} finished", self.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;

    fn probe_file(dir: &TempDir, body: Value) -> std::path::PathBuf {
        let path = dir.path().join("probe.json");
        fs::write(&path, body.to_string()).unwrap();
        path
    }

    fn job(dir: &TempDir, probe: &Path) -> JobSpec {
        let target = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        JobSpec::new(
            target,
            dir.path().join("continuous.dat"),
            probe,
            dir.path().join("results").join("run1"),
        )
    }

    fn shell(script: &str) -> PipelineAdapter {
        let mut config = PipelineConfig::default();
        config.command = "sh".to_string();
        config.args = vec!["-c".to_string(), script.to_string()];
        config.settings.insert("n_chan_bin".to_string(), json!(10));
        config.settings.insert("batch_size".to_string(), json!(60000));
        PipelineAdapter::from_config(&config)
    }

    #[test]
    fn probe_channel_count_overrides_configured_value() {
        let probe = Probe { n_chan: Some(96), chan_map: None };
        let mut base = BTreeMap::new();
        base.insert("n_chan_bin".to_string(), json!(10));
        base.insert("batch_size".to_string(), json!(60000));

        let merged = merge_settings(&base, &probe).unwrap();
        assert_eq!(merged["n_chan_bin"], json!(96));
        assert_eq!(merged["batch_size"], json!(60000));
    }

    #[test]
    fn channel_count_falls_back_to_channel_map() {
        let probe: Probe = serde_json::from_value(json!({ "chanMap": [0, 1, 2, 3] })).unwrap();
        assert_eq!(probe.channel_count().unwrap(), 4);

        let empty: Probe = serde_json::from_value(json!({ "xc": [] })).unwrap();
        assert!(empty.channel_count().is_err());
    }

    #[test]
    fn runs_pipeline_with_merged_settings() {
        let dir = TempDir::new().unwrap();
        let probe = probe_file(&dir, json!({ "n_chan": 96, "chanMap": [0, 1] }));
        let job = job(&dir, &probe);
        let adapter = shell("cp {settings} {output}/seen.json");

        let message = adapter.execute(&job).unwrap();
        assert_eq!(message, "sh finished");

        let seen: Value =
            serde_json::from_str(&fs::read_to_string(job.output_path.join("seen.json")).unwrap())
                .unwrap();
        assert_eq!(seen["n_chan_bin"], json!(96));
        assert_eq!(seen["batch_size"], json!(60000));
        assert!(job.output_path.join("futuresort_settings.json").exists());
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let probe = probe_file(&dir, json!({ "n_chan": 4 }));
        let adapter = shell("echo sorting failed >&2; exit 3");

        let err = adapter.execute(&job(&dir, &probe)).unwrap_err().to_string();
        assert!(err.contains("exit status: 3"), "{}", err);
        assert!(err.contains("sorting failed"), "{}", err);
    }

    #[test]
    fn missing_probe_fails_before_launch() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let adapter = shell("touch {output}/launched");
        let job = job(&dir, &missing);

        assert!(adapter.execute(&job).is_err());
        assert!(!job.output_path.join("launched").exists());
    }
}
