use anyhow::{Context, Result};
use rollcall_core::{Config, SidecarDetector};
use rollcall_store::Store;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod capture;
mod kiosk;
mod scanner;

use capture::SharedDevice;
use kiosk::Kiosk;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;

    let detector = match &config.sidecar_dir {
        Some(dir) => SidecarDetector::with_dir(dir),
        None => SidecarDetector::new(),
    };

    // Fatal start-up failures (no device, permission denied) surface here once.
    let device = SharedDevice::new(capture::open(&config).context("opening capture device")?);

    tracing::info!(period_ms = config.scan_period_ms, "rollcalld ready");

    let kiosk = Kiosk {
        device,
        detector: Arc::new(detector),
        store: Arc::new(Mutex::new(store)),
        period: config.scan_period(),
        signature_cache: config.signature_cache,
    };
    kiosk
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
