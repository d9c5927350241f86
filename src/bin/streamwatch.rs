//! streamwatch - runs the analytics pipeline over line-delimited payloads
//!
//! Reads one payload per line from stdin (or `STREAMWATCH_INPUT`), routes
//! records to worker partitions, and renders alerts, key summaries and
//! leaderboards through the log.
//!
//! Usage:
//!   producer | cargo run --release --bin streamwatch
//!   STREAMWATCH_PROFILE=smoker STREAMWATCH_FORMAT=delimited \
//!     STREAMWATCH_INPUT=readings.csv cargo run --release --bin streamwatch
//!
//! See `PipelineConfig::from_env` for every environment variable.

use dotenv::dotenv;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;
use streamwatch::pipeline::{
    AlertSink, FanoutSink, IngestionRuntime, JsonlAlertWriter, LineSource, LogSink,
    MessageSource, PipelineConfig,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Starting streamwatch");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink::new())];
    if let Some(path) = &config.alert_log {
        match JsonlAlertWriter::new(path) {
            Ok(writer) => sinks.push(Arc::new(writer)),
            Err(e) => {
                error!("❌ Failed to open alert log {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        }
    }
    let sink: Arc<dyn AlertSink> = Arc::new(FanoutSink::new(sinks));

    let mut source: Box<dyn MessageSource> = match &config.input {
        Some(path) => match LineSource::open(path).await {
            Ok(source) => {
                info!("📂 Reading {}", path);
                Box::new(source)
            }
            Err(e) => {
                error!("❌ Failed to open input {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            info!("⌨️  Reading stdin");
            Box::new(LineSource::stdin())
        }
    };

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received");
            ctrl_c_token.cancel();
        }
    });

    let runtime = IngestionRuntime::new(config, sink);
    let stats = runtime.run(source.as_mut(), shutdown).await;

    info!(
        "👋 Done: {} processed, {} rejected, {} alerts, {} summaries",
        stats.processed, stats.rejected, stats.alerts, stats.summaries
    );
    ExitCode::SUCCESS
}
