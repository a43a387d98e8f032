mod mjpeg;

use mjpeg_common::config::Config;
use mjpeg_common::multipart::MultipartError;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("not an MJPEG stream, content type {0:?}")]
    NotMjpeg(String),
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.probe.url,
        max_frames = config.probe.max_frames,
        "starting MJPEG probe"
    );

    tokio::select! {
        result = mjpeg::run_probe(&config.probe.url, config.probe.max_frames) => match result {
            Ok(frames) => info!(frames, "probe finished"),
            Err(e) => {
                error!(error = %e, "probe failed");
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
}
