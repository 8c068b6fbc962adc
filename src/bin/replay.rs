use clap::{ArgAction, Parser};
use jsonmock::{run_replay, ReplayConfiguration};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Replays queries against a running endpoint and validates every answer.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Endpoint address ending in '?', including the 'debug' parameter if needed
    #[arg(long, default_value = "http://0.0.0.0/testingEnd?")]
    target: String,

    /// Pattern file or recorded request/response map
    #[arg(long, default_value = "data/requestResponseMap.json")]
    data_file: PathBuf,

    /// Check that the endpoint is up through a HEAD request first
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    check_up: bool,

    /// Maximum number of requests in flight; defaults to 3 per core
    #[arg(long)]
    concurrency: Option<usize>,

    /// Ask for gzip encoded answers
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    gzip: bool,

    #[arg(long)]
    debug: bool,

    /// Per request timeout
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut configuration = ReplayConfiguration::new(args.data_file);
    configuration.set_target(args.target);
    configuration.set_check_up(args.check_up);
    configuration.set_gzip(args.gzip);
    configuration.set_forced_debug(args.debug);
    configuration.set_timeout(args.timeout_secs.map(Duration::from_secs));
    if let Some(concurrency) = args.concurrency {
        configuration.set_concurrency(concurrency);
    }

    match run_replay(&configuration).await {
        Ok(report) if report.passed() => {
            info!("{}", report);
            ExitCode::SUCCESS
        }
        Ok(report) => {
            error!("{}", report);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
