use std::env;
use std::process::ExitCode;

use payout_eng::csv::{read_operations, write_balances};
use payout_eng::{Engine, EngineConfig};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: payout-eng <operations.csv>");
        return ExitCode::FAILURE;
    };
    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let engine = Engine::new(EngineConfig::from_env());
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in read_operations(&path) {
            match result {
                Ok(op) => {
                    if op_sender.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
    });

    let summary = engine.run(ReceiverStream::new(op_receiver)).await;
    info!(
        applied = summary.applied,
        skipped = summary.skipped,
        "batch finished"
    );

    write_balances(engine.store().balances());
    ExitCode::SUCCESS
}
