use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, NaiveDateTime};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use common::{
    format_remaining, CancelOutcome, Defaults, JobSpec, Request, Response, Status, StatusReport,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Daemon socket
    #[arg(long, global = true, default_value = common::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule the pipeline to run at a future time
    Schedule {
        /// Data file to process
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Probe (device configuration) file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Results folder
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// When to start: "5s", "in 2h", "at 22", "tomorrow at 2am" or "2026-10-17 02:00"
        #[arg(short, long)]
        when: Option<String>,
        /// Follow the countdown until the run finishes
        #[arg(long)]
        watch: bool,
    },
    /// Cancel the scheduled run
    Cancel,
    /// Show what is scheduled
    Status {
        /// Refresh every second until the scheduler is idle
        #[arg(short, long)]
        watch: bool,
    },
}

/// What the operator typed; gaps may be filled from the daemon's defaults.
struct ScheduleForm {
    input: Option<PathBuf>,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    when: Option<String>,
}

impl ScheduleForm {
    fn is_complete(&self) -> bool {
        self.input.is_some() && self.config.is_some() && self.output.is_some() && self.when.is_some()
    }
}

/// Missing paths stay empty unless prefill is on, so the daemon rejects them.
fn build_job(form: ScheduleForm, defaults: &Defaults, now: NaiveDateTime) -> Result<JobSpec> {
    let fill = |value: Option<PathBuf>, default: &Path| {
        value
            .or_else(|| defaults.prefill.then(|| default.to_path_buf()))
            .unwrap_or_default()
    };

    let target = match form.when {
        Some(when) => common::parse_time_spec(&when)?.resolve(now)?,
        None if defaults.prefill => i64::try_from(defaults.schedule_delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .with_context(|| {
                format!("Default delay out of range: {}s", defaults.schedule_delay_secs)
            })?,
        None => bail!("No time given; use --when (e.g. \"5s\", \"at 22\", \"tomorrow at 2am\")"),
    };

    Ok(JobSpec::new(
        target,
        fill(form.input, &defaults.input_path),
        fill(form.config, &defaults.config_path),
        fill(form.output, &defaults.output_dir),
    ))
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("Failed to connect to futuresort-daemon at {}", path.display()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn call(&mut self, req: &Request) -> Result<Response> {
        let mut req_bytes = serde_json::to_vec(req)?;
        req_bytes.push(b'\n');
        self.writer.write_all(&req_bytes).await?;

        let line = self
            .lines
            .next_line()
            .await?
            .context("Daemon closed the connection")?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn status(&mut self) -> Result<StatusReport> {
        match self.call(&Request::Status).await? {
            Response::Status(report) => Ok(report),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(resp: Response) -> anyhow::Error {
    match resp {
        Response::Error(e) => anyhow!("Daemon error: {}", e),
        other => anyhow!("Unexpected response: {:?}", other),
    }
}

fn format_time(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%d %-I:%M:%S %p").to_string()
}

fn render_status(report: &StatusReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.add_row(vec!["Status".to_string(), report.status.to_string()]);

    if let Some(ref job) = report.job {
        table.add_row(vec!["Scheduled for".to_string(), format_time(&job.target_time)]);
        if let Some(secs) = report.remaining_secs {
            table.add_row(vec![
                "Time until execution".to_string(),
                format_remaining(Duration::seconds(secs)),
            ]);
        }
        table.add_row(vec!["Data file".to_string(), job.input_path.display().to_string()]);
        table.add_row(vec!["Probe file".to_string(), job.config_path.display().to_string()]);
        table.add_row(vec!["Results folder".to_string(), job.output_path.display().to_string()]);
    }

    if let Some(ref last) = report.last_run {
        table.add_row(vec![
            "Last run".to_string(),
            format!("{} at {}: {}", last.status, format_time(&last.finished_at), last.message),
        ]);
    }
    table
}

async fn watch(client: &mut Client) -> Result<()> {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        interval.tick().await;
        let report = client.status().await?;
        let line = match report.status {
            Status::Armed => format!(
                "Time until execution: {}",
                format_remaining(Duration::seconds(report.remaining_secs.unwrap_or(0)))
            ),
            Status::Running => "Action has been triggered".to_string(),
            _ => {
                println!();
                match report.last_run {
                    Some(last) => println!("Action finished ({}): {}", last.status, last.message),
                    None => println!("Not scheduled"),
                }
                return Ok(());
            }
        };
        print!("\r{:<60}", line);
        std::io::stdout().flush()?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = Client::connect(&cli.socket).await?;

    match cli.command {
        Commands::Schedule { input, config, output, when, watch: follow } => {
            let form = ScheduleForm { input, config, output, when };
            let defaults = if form.is_complete() {
                Defaults::default()
            } else {
                match client.call(&Request::Defaults).await? {
                    Response::Defaults(defaults) => defaults,
                    other => return Err(unexpected(other)),
                }
            };

            let now = chrono::Local::now().naive_local();
            let job = build_job(form, &defaults, now)?;
            match client.call(&Request::Schedule(job)).await? {
                Response::Scheduled(job) => {
                    println!("Scheduled for {}", format_time(&job.target_time))
                }
                Response::Rejected(e) => bail!("{}", e),
                other => return Err(unexpected(other)),
            }

            if follow {
                watch(&mut client).await?;
            }
        }
        Commands::Cancel => match client.call(&Request::Cancel).await? {
            Response::Cancelled(CancelOutcome::Cancelled) => println!("Scheduled task cancelled"),
            Response::Cancelled(CancelOutcome::AlreadyRunning) => {
                println!("Pipeline already running; it will run to completion")
            }
            Response::Cancelled(CancelOutcome::NothingScheduled) => println!("Not scheduled"),
            other => return Err(unexpected(other)),
        },
        Commands::Status { watch: follow } => {
            let report = client.status().await?;
            println!("{}", render_status(&report));
            if follow && matches!(report.status, Status::Armed | Status::Running) {
                watch(&mut client).await?;
            }
        }
    }

    Ok(())
}
