mod noise;

use std::path::PathBuf;
use std::sync::Arc;

use mjpeg_common::config::Config;
use mjpeg_stream::{Stream, StreamOptions};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

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

    let shutdown = CancellationToken::new();
    let stream = Arc::new(Stream::with_options(StreamOptions::from_config(
        &config.stream,
        shutdown.clone(),
    )));

    // Frame generation runs on its own thread, decoupled from client cadence.
    let producer = {
        let stream = Arc::clone(&stream);
        let noise = config.noise.clone();
        let cancel = shutdown.clone();
        std::thread::Builder::new()
            .name("noise-producer".into())
            .spawn(move || noise::run_noise_loop(stream, noise, cancel))
    };
    let producer = match producer {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to spawn noise producer thread");
            std::process::exit(1);
        }
    };

    let app = Arc::clone(&stream)
        .router()
        .layer(TraceLayer::new_for_http());

    let addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    info!(
        addr,
        fps = config.stream.fps,
        quality = config.stream.quality,
        "listening for MJPEG clients on http://{addr}/"
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    let graceful = shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
    {
        error!(error = %e, "server error");
    }

    shutdown.cancel();
    match producer.join() {
        Ok(published) => info!(published, "stopped"),
        Err(_) => error!("noise producer panicked"),
    }
}
