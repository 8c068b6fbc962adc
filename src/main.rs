use clap::Parser;
use jsonmock::{Error, MockConfiguration, MockServer};
use std::{net::IpAddr, path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

/// Answers HTTP JSON requests from a recorded request/response map.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, default_value_t = 9797)]
    port: u16,

    /// Mapped request/response file
    #[arg(long, default_value = "data/requestResponseMap.json")]
    map: PathBuf,

    /// Json Schema to validate requests
    #[arg(long, default_value = "data/requestJsonSchema.json")]
    req: PathBuf,

    /// Json Schema to validate responses
    #[arg(long, default_value = "data/responseJsonSchema.json")]
    res: PathBuf,

    /// Force debug mode for every request
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match serve(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(args: Args) -> Result<(), Error> {
    let mut configuration = MockConfiguration::new();
    configuration.set_host(args.host);
    configuration.set_port(args.port);
    configuration.set_corpus_file(args.map);
    configuration.set_request_schema_file(args.req);
    configuration.set_response_schema_file(args.res);
    configuration.set_forced_debug(args.debug);

    let responder = configuration.load()?;
    let server = MockServer::start(configuration.address(), Arc::new(responder))?;

    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("unable to listen for Ctrl-C: {}", e);
            }
        })
        .await
}
