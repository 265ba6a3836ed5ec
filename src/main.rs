use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use reserva::engine::Engine;
use reserva::notify::Notifier;
use reserva::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("RESERVA_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    reserva::observability::init(metrics_port);

    let data_dir = std::env::var("RESERVA_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let sweep_interval_secs: u64 = std::env::var("RESERVA_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3600);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("reserva.wal");

    let engine = Arc::new(Engine::open(&wal_path, Arc::new(Notifier::new()))?);
    info!("reserva engine up");
    info!("  wal: {}", wal_path.display());
    info!("  professionals: {}", engine.state.len());
    info!("  sweep interval: {sweep_interval_secs}s");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    let sweeper_handle = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        Duration::from_secs(sweep_interval_secs),
    ));

    // Run until SIGTERM/ctrl-c.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received");
    sweeper_handle.abort();
    info!("reserva stopped");
    Ok(())
}
