mod http;
mod store;

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::SignalKind;
use tokio::try_join;
use tokio_util::sync::CancellationToken;
use zcospace::{controller::Config, AdmissionController};

// Run-time configuration.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(flatten)]
    server_cli: http::ServerCli,

    #[clap(flatten)]
    store_cli: store::StoreCli,

    #[clap(flatten)]
    controller_cli: ControllerCli,
}

#[derive(Debug, Parser)]
struct ControllerCli {
    /// Requisitions that can be queued at once, across both directions.
    #[arg(long, default_value = "1024")]
    max_requisitions: usize,
}

async fn killer(token: CancellationToken) -> Result<()> {
    let mut sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => log::info!("Received SIGINT."),
        _ = sigterm.recv() => log::info!("Received SIGTERM."),
    }
    token.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        server_cli,
        store_cli,
        controller_cli,
    } = Cli::parse();

    let heap = store::SqliteHeap::open(store_cli)?;
    let controller = AdmissionController::new(
        heap,
        Config {
            max_requisitions: controller_cli.max_requisitions,
        },
    );

    let token = CancellationToken::new();
    let http = http::main(server_cli, controller, token.clone());
    let killer = killer(token.clone());
    try_join!(http, killer)?;
    Ok(())
}
