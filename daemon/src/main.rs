mod adapter;
mod clock;
mod config;
mod scheduler;
mod server;

use adapter::PipelineAdapter;
use clap::Parser;
use clock::SystemClock;
use config::{Config, LoggingConfig};
use scheduler::{Scheduler, SchedulerEvent};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::UnixListener;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (.yaml, .yml or .toml)
    #[arg(short, long, default_value = common::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override the socket path from the configuration
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, load_error) = Config::load_or_default(&args.config);

    setup_logging(&config.logging)?;
    log::info!("Starting futuresort-daemon...");
    if let Some(e) = load_error {
        log::warn!("No usable configuration ({:#}). Using default settings.", e);
    }

    let adapter = Arc::new(PipelineAdapter::from_config(&config.pipeline));
    let (scheduler, mut events) =
        Scheduler::new(adapter, Arc::new(SystemClock), config.server.tick_interval());
    let scheduler = Arc::new(scheduler);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            report(&event);
        }
    });

    let socket_path = args.socket.unwrap_or(config.server.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("Listening on {}", socket_path.display());

    // Set socket permissions to allow all users to connect
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&socket_path)?.permissions();
    perms.set_mode(0o666);
    std::fs::set_permissions(&socket_path, perms)?;

    let defaults = Arc::new(config.defaults);
    tokio::select! {
        res = server::serve(listener, scheduler.clone(), defaults) => res?,
        res = shutdown_signal() => {
            res?;
            log::info!("Shutdown requested");
        }
    }

    scheduler.shutdown().await;
    if let Err(e) = std::fs::remove_file(&socket_path) {
        log::warn!("Failed to remove socket {}: {}", socket_path.display(), e);
    }
    log::info!("futuresort-daemon stopped");
    Ok(())
}

fn report(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::Armed(job) => log::info!(
            "Armed for {} ({} -> {})",
            job.target_time.format("%Y-%m-%d %H:%M:%S"),
            job.input_path.display(),
            job.output_path.display()
        ),
        SchedulerEvent::Running(_) => log::info!("Action has been triggered"),
        SchedulerEvent::Finished(_, outcome) => {
            log::info!("Action finished ({}): {}", outcome.status(), outcome.message())
        }
        SchedulerEvent::Cancelled(_) => log::info!("Scheduled task cancelled"),
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = log::LevelFilter::from_str(&config.level).unwrap_or(log::LevelFilter::Info);

    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level);

    let split_pipeline_output = config.pipeline_output.is_some();

    // Main log: pipeline output stays out when it has its own file
    let mut main_log = fern::Dispatch::new()
        .filter(move |metadata| !split_pipeline_output || metadata.target() != "pipeline_output")
        .chain(std::io::stdout());
    if let Some(ref output) = config.output {
        main_log = main_log.chain(fern::log_file(output)?);
    }

    let mut dispatch = base_config.chain(main_log);
    if let Some(ref output) = config.pipeline_output {
        let pipeline_log = fern::Dispatch::new()
            .filter(|metadata| metadata.target() == "pipeline_output")
            .chain(fern::log_file(output)?);
        dispatch = dispatch.chain(pipeline_log);
    }

    dispatch.apply()?;
    Ok(())
}
