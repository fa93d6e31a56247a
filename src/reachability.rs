use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::MediaSyncEngine;

/// Source of connectivity observations
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_available(&self) -> bool;
}

/// Probe that considers the network available when the asset backend
/// answers a HEAD request at all (any HTTP status counts).
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_available(&self) -> bool {
        self.client.head(&self.url).send().await.is_ok()
    }
}

/// Monitor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityConfig {
    pub poll_interval_secs: u64,
    /// Ignore repeated restore transitions within this window (rapid
    /// flapping); duplicate triggers past it are harmless because
    /// queued uploads are idempotent
    pub debounce_secs: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            debounce_secs: 5,
        }
    }
}

/// Handle for a running reachability monitor
pub struct ReachabilityMonitor {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReachabilityMonitor {
    /// Signal the monitor to shut down
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

/// Start polling connectivity and feeding the engine.
///
/// On an unavailable→available transition the monitor triggers one retry
/// sweep of queued records; available→available polls never trigger.
pub fn start_reachability_monitor(
    probe: Arc<dyn ConnectivityProbe>,
    engine: MediaSyncEngine,
    config: ReachabilityConfig,
) -> ReachabilityMonitor {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        reachability_loop(probe, engine, config, shutdown_rx).await;
    });

    ReachabilityMonitor { shutdown_tx }
}

async fn reachability_loop(
    probe: Arc<dyn ConnectivityProbe>,
    engine: MediaSyncEngine,
    config: ReachabilityConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let poll_interval = Duration::from_secs(config.poll_interval_secs.max(1));
    let debounce = Duration::from_secs(config.debounce_secs);
    let mut last_available: Option<bool> = None;
    let mut last_trigger: Option<Instant> = None;

    log::info!(
        "Reachability: monitor started (poll every {}s)",
        poll_interval.as_secs(),
    );

    loop {
        let available = probe.is_available().await;
        engine.set_network_available(available);

        if available && last_available == Some(false) {
            let debounced = last_trigger
                .map(|t| t.elapsed() < debounce)
                .unwrap_or(false);
            if debounced {
                log::debug!("Reachability: restore within debounce window, skipping trigger");
            } else {
                last_trigger = Some(Instant::now());
                log::info!("Reachability: connectivity restored, retrying queued transfers");
                let retried = engine.retry_failed_and_pending().await;
                log::info!("Reachability: retry sweep covered {} records", retried);
            }
        }
        last_available = Some(available);

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.recv() => {
                log::info!("Reachability: monitor shutting down");
                return;
            }
        }
    }
}
