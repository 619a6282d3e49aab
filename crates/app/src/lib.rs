use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use doorcount_core::api::CountingClient;
use doorcount_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use doorcount_core::job::{JobStatus, Observation};
use doorcount_core::logging::{self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER};
use doorcount_core::params::{DoorDirection, ParameterSet};
use doorcount_core::session::CountingSession;
use doorcount_core::view::JobView;

#[derive(Parser)]
#[command(
    name = "doorcount",
    about = "Submit doorway videos to a people-counting service and watch the counts come in"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        global = true,
        help = "Counting service base URL (overrides config.toml)"
    )]
    base_url: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a video and stream status and counts until the job finishes
    Watch(WatchArgs),
    /// Fetch the current status of an existing job once
    Status(JobArgs),
    /// Fetch the full result history of an existing job once
    History(JobArgs),
}

#[derive(Args)]
struct WatchArgs {
    #[arg(help = "Path to the video file to submit")]
    video: PathBuf,

    #[arg(long, value_name = "EDGE", help = "Door edge: up, down, left or right")]
    door_direction: Option<DoorDirection>,

    #[arg(long, value_name = "0..1", help = "Detection confidence threshold")]
    confidence: Option<f64>,

    #[arg(long, value_name = "N", help = "Frames to skip between detections (0-2)")]
    skip_frames: Option<u8>,

    #[arg(
        long,
        value_name = "SECS",
        help = "Seconds between count snapshots and status polls (1-60)"
    )]
    interval: Option<u64>,

    #[arg(long, value_name = "BOOL", help = "Center-crop the video before analysis")]
    crop: Option<bool>,

    #[arg(long, value_name = "BOOL", help = "Render a preview on the service side")]
    show_preview: Option<bool>,
}

#[derive(Args)]
struct JobArgs {
    #[arg(help = "Job identifier returned at submission")]
    job_id: String,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(resolved_data_dir.as_path());

    if let Err(e) = initialize_data_dir(&resolved_data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    let cfg_path = config_path(&resolved_data_dir);
    let config = match AppConfig::load_from_path(&cfg_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    };
    let base_url = cli
        .base_url
        .unwrap_or_else(|| config.api.base_url.clone());

    match cli.command {
        Commands::Watch(args) => run_watch(args, &base_url, config.defaults).await,
        Commands::Status(args) => run_status(args, &base_url, &config.defaults).await,
        Commands::History(args) => run_history(args, &base_url, &config.defaults).await,
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let filter = logging::select_log_filter(&options);

    match logging::build_file_sink_plan(&options) {
        FileSinkPlan::Ready(ready) => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(parse_env_filter_with_fallback(&filter, "console")),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(parse_env_filter_with_fallback(&filter, "file")),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(parse_env_filter_with_fallback(&filter, "console")),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            let attempted_log_dir = fallback
                .attempted_log_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            warn!(
                attempted_log_dir = %attempted_log_dir,
                reason = %fallback.reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    let pid = std::process::id();
    let cfg_path = config_path(data_dir);
    info!(
        pid,
        data_dir = %data_dir.display(),
        config_path = %cfg_path.display(),
        "Runtime startup metadata"
    );
}

fn merge_parameters(defaults: ParameterSet, args: &WatchArgs) -> ParameterSet {
    ParameterSet {
        door_direction: args.door_direction.unwrap_or(defaults.door_direction),
        confidence: args.confidence.unwrap_or(defaults.confidence),
        skip_frames: args.skip_frames.unwrap_or(defaults.skip_frames),
        poll_interval_secs: args.interval.unwrap_or(defaults.poll_interval_secs),
        crop: args.crop.unwrap_or(defaults.crop),
        show_preview: args.show_preview.unwrap_or(defaults.show_preview),
    }
}

async fn run_watch(args: WatchArgs, base_url: &str, defaults: ParameterSet) -> Result<()> {
    let params = merge_parameters(defaults, &args);
    let client = CountingClient::new(base_url)?.with_poll_timeout(params.poll_interval());
    let session = CountingSession::new(client, params);
    session.select_file(&args.video);

    info!(video = %args.video.display(), "Submitting counting job");
    let handle = session.submit().await?;
    println!(
        "job {} submitted (status: {})",
        handle.job_id, handle.initial_status
    );

    let mut rx = session.subscribe();
    let mut last_status = Some(handle.initial_status);
    let mut printed_rows = 0usize;

    loop {
        {
            let view = rx.borrow_and_update().clone();

            if view.status != last_status {
                if let Some(status) = view.status {
                    println!("status: {status}");
                }
                last_status = view.status;
            }

            // History is replaced wholesale on every fetch; only print the
            // rows appended since the last one we showed.
            if view.history.len() < printed_rows {
                printed_rows = view.history.len();
            }
            for observation in &view.history[printed_rows..] {
                println!("  {}", format_observation(observation));
            }
            printed_rows = view.history.len();

            if view.is_terminal() {
                print_final_report(&view);
                if view.status == Some(JobStatus::Failed) {
                    match view.error.as_deref() {
                        Some(detail) => bail!("counting job failed: {detail}"),
                        None => bail!("counting job failed"),
                    }
                }
                return Ok(());
            }
        }

        if rx.changed().await.is_err() {
            bail!("session closed before the job finished");
        }
    }
}

async fn run_status(args: JobArgs, base_url: &str, defaults: &ParameterSet) -> Result<()> {
    let client = CountingClient::new(base_url)?.with_poll_timeout(defaults.poll_interval());
    let snapshot = client.job_status(&args.job_id).await?;

    println!("status: {}", snapshot.status);
    if let Some(error) = &snapshot.error_message {
        println!("error: {error}");
    }
    if let Some(latest) = &snapshot.latest {
        println!("  {}", format_observation(latest));
    }
    Ok(())
}

async fn run_history(args: JobArgs, base_url: &str, defaults: &ParameterSet) -> Result<()> {
    let client = CountingClient::new(base_url)?.with_poll_timeout(defaults.poll_interval());
    let history = client.result_history(&args.job_id).await?;

    if history.is_empty() {
        println!("no results recorded yet");
        return Ok(());
    }
    print_history_table(&history);
    Ok(())
}

fn format_observation(observation: &Observation) -> String {
    format!(
        "{}  inside {:>4}  in +{}  out -{}",
        observation.timestamp,
        observation.total_present_inside,
        observation.incoming_last_interval,
        observation.outgoing_last_interval
    )
}

fn print_history_table(history: &[Observation]) {
    println!(
        "{:<22} {:>8} {:>10} {:>10}",
        "timestamp", "inside", "incoming", "outgoing"
    );
    for observation in history {
        println!(
            "{:<22} {:>8} {:>10} {:>10}",
            observation.timestamp,
            observation.total_present_inside,
            observation.incoming_last_interval,
            observation.outgoing_last_interval
        );
    }
}

fn print_final_report(view: &JobView) {
    if let Some(status) = view.status {
        println!("final status: {status}");
    }
    if let Some(latest) = &view.latest {
        println!("latest: {}", format_observation(latest));
    }
    if !view.history.is_empty() {
        println!();
        print_history_table(&view.history);
    }
}

#[cfg(test)]
mod merge_parameter_tests {
    use super::*;

    fn watch_args() -> WatchArgs {
        WatchArgs {
            video: PathBuf::from("/videos/entrance.mp4"),
            door_direction: None,
            confidence: None,
            skip_frames: None,
            interval: None,
            crop: None,
            show_preview: None,
        }
    }

    #[test]
    fn no_overrides_keeps_defaults() {
        let defaults = ParameterSet {
            confidence: 0.65,
            ..Default::default()
        };
        let merged = merge_parameters(defaults.clone(), &watch_args());
        assert_eq!(merged, defaults);
    }

    #[test]
    fn cli_overrides_win_over_defaults() {
        let args = WatchArgs {
            door_direction: Some(DoorDirection::Left),
            confidence: Some(0.9),
            interval: Some(20),
            crop: Some(true),
            ..watch_args()
        };

        let merged = merge_parameters(ParameterSet::default(), &args);
        assert_eq!(merged.door_direction, DoorDirection::Left);
        assert_eq!(merged.confidence, 0.9);
        assert_eq!(merged.poll_interval_secs, 20);
        assert!(merged.crop);
        // untouched fields come from the defaults
        assert_eq!(merged.skip_frames, ParameterSet::default().skip_frames);
        assert_eq!(merged.show_preview, ParameterSet::default().show_preview);
    }
}
