//! `test-server`: run the load-testing origin.
//!
//!   RUST_LOG=debug test-server --config server.json
//!
//! Try:
//!   curl -i http://localhost:10000/
//!   curl -i -H 'x-test-server-config: {"response_body_size": 64}' http://localhost:10000/

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use testserver::Server;
use testserver::config::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "test-server", version, about)]
struct Args {
    /// JSON configuration file.
    #[arg(long, short, env = "TEST_SERVER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(long, short, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), testserver::Error> {
    let config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let listen = args.listen.unwrap_or_else(|| config.listen());
    info!(config = ?args.config, %listen, "starting test server");

    Server::bind(listen).serve(config.build_app()?).await
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(directive.into())
                .from_env_lossy(),
        )
        .init();
}
