mod error;

use std::env;
use std::sync::Arc;

use log::{
    error,
    info,
};
use sweep_collaborators::{
    BestEffortIcmpScanner,
    FileKvStore,
    HttpDeviceRegistry,
    TcpConnectScanner,
};
use sweep_core::Config;
use sweep_engine::{
    DeviceRegistry,
    KvStore,
    Scanner,
    SweepEngine,
};
use tokio::signal;

use crate::error::ServerError;

const CONFIG_KV_KEY: &str = "config";

/// Loads the initial configuration from `SWEEP_CONFIG_PATH` (§B). Further
/// updates, if `SWEEP_KV_PATH` is set, arrive through the KV watch path
/// instead of by re-reading this file.
fn load_config() -> Result<Config, ServerError> {
    let path = env::var("SWEEP_CONFIG_PATH").map_err(|_| ServerError::Configuration("SWEEP_CONFIG_PATH not set".into()))?;
    let bytes = std::fs::read(&path).map_err(|source| ServerError::ReadConfig { path: path.clone(), source })?;
    Ok(Config::decode(&bytes)?)
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    let config = load_config()?;
    let registry_url = env::var("SWEEP_REGISTRY_URL").map_err(|_| ServerError::Configuration("SWEEP_REGISTRY_URL not set".into()))?;

    let icmp_scanner: Arc<dyn Scanner> = Arc::new(BestEffortIcmpScanner::new(config.icmp_settings.timeout));
    let tcp_scanner: Arc<dyn Scanner> = Arc::new(TcpConnectScanner::new(config.tcp_settings.timeout));
    let registry: Arc<dyn DeviceRegistry> = Arc::new(HttpDeviceRegistry::new(registry_url, config.tcp_settings.timeout));
    let store = sweep_store::Store::new();
    let processor = sweep_processor::Processor::new();

    let kv_store: Option<Arc<dyn KvStore>> = match env::var("SWEEP_KV_PATH") {
        Ok(path) => {
            info!("watching {path} for configuration updates");
            Some(Arc::new(FileKvStore::new(path)))
        }
        Err(_) => None,
    };

    let engine = SweepEngine::new(config, icmp_scanner, tcp_scanner, store, processor, registry, kv_store, CONFIG_KV_KEY);

    let engine_handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };

    #[cfg(unix)]
    {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received Ctrl+C signal");
            }
            _ = async {
                if let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    let _ = sigterm.recv().await;
                    info!("received SIGTERM signal");
                }
            } => {}
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.ok();
        info!("received Ctrl+C signal");
    }

    engine.stop().await;

    if let Err(e) = tokio::time::timeout(tokio::time::Duration::from_secs(15), engine_handle).await {
        error!("engine shutdown timed out: {e}");
    }

    info!("sweep-server shutdown complete");
    Ok(())
}
