use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{
    debug,
    error,
    info,
    warn,
};
use sweep_core::{
    Config,
    DeviceUpdate,
    ProbeResult,
    SweepMode,
    Target,
};
use sweep_device::{
    CycleIdentity,
    DeviceAggregatorSet,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::targets::generate_targets;
use crate::traits::{
    DeviceRegistry,
    KvStore,
    ResultProcessorBackend,
    Scanner,
    StoreBackend,
};

/// Default per-cycle timeout budget (§4.5 `Start`).
const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Default per-result timeout inside a scan pipeline (§4.5 `runSweep` step 5).
const PER_RESULT_TIMEOUT: Duration = Duration::from_millis(500);
/// Bounded context for stopping scanners (§4.5 `Stop`).
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Computes `effective_concurrency = min(config.concurrency, max(5,
/// total_targets/10))` (§4.5 "Concurrency budgeting").
fn effective_concurrency(configured: u32, total_targets: usize) -> usize {
    let floor = (total_targets / 10).max(5);
    (configured as usize).min(floor)
}

fn target_source(target: &Target) -> String {
    target.metadata_str("source").unwrap_or_default().to_string()
}

fn target_query_label(target: &Target) -> String {
    target.metadata_str("query_label").unwrap_or_default().to_string()
}

fn per_probe_update(r: &ProbeResult, identity: &CycleIdentity) -> DeviceUpdate {
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("sweep_mode".to_string(), r.target.mode().as_str().to_string());
    if r.target.port != 0 {
        metadata.insert("port".to_string(), r.target.port.to_string());
    }
    metadata.insert("response_time".to_string(), format!("{}", r.resp_time.as_millis()));
    metadata.insert("packet_loss".to_string(), format!("{}", r.packet_loss));
    metadata.insert("source".to_string(), target_source(&r.target));

    DeviceUpdate {
        agent_id: identity.agent_id.clone(),
        poller_id: identity.poller_id.clone(),
        partition: identity.partition.clone(),
        device_id: format!("{}:{}", identity.partition, r.target.host),
        source: target_source(&r.target),
        ip: r.target.host.clone(),
        timestamp: chrono::Utc::now(),
        is_available: r.available,
        metadata,
        confidence: if r.available { 1.0 } else { 0.0 },
    }
}

/// Orchestrates one sweep cycle end to end and the lifecycle around it
/// (§4.5). Scanners, store, processor, registry, and KV store are injected
/// so the core lifecycle is testable against fakes.
pub struct SweepEngine {
    config: Arc<RwLock<Config>>,
    icmp_scanner: Arc<dyn Scanner>,
    tcp_scanner: Arc<dyn Scanner>,
    store: Arc<dyn StoreBackend>,
    processor: Arc<dyn ResultProcessorBackend>,
    registry: Arc<dyn DeviceRegistry>,
    kv_store: Option<Arc<dyn KvStore>>,
    kv_key: String,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SweepEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config, icmp_scanner: Arc<dyn Scanner>, tcp_scanner: Arc<dyn Scanner>, store: Arc<dyn StoreBackend>,
        processor: Arc<dyn ResultProcessorBackend>, registry: Arc<dyn DeviceRegistry>, kv_store: Option<Arc<dyn KvStore>>,
        kv_key: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(RwLock::new(config)),
            icmp_scanner,
            tcp_scanner,
            store,
            processor,
            registry,
            kv_store,
            kv_key: kv_key.into(),
            shutdown: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Starts the config watcher and the sweep loop (§4.5 `Start`). Runs one
    /// immediate sweep before entering the ticker loop.
    pub async fn start(self: Arc<Self>) {
        let watcher = {
            let engine = self.clone();
            tokio::spawn(async move { engine.watch_config().await })
        };
        self.tasks.lock().await.push(watcher);

        let interval = {
            let cfg = self.config.read().await;
            if cfg.interval.is_zero() {
                DEFAULT_INTERVAL
            } else {
                cfg.interval
            }
        };

        self.run_one_cycle().await;

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; already ran above
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("engine: shutdown requested, exiting sweep loop");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_one_cycle().await;
                }
            }
        }
    }

    async fn run_one_cycle(&self) {
        let cycle_ctx = self.shutdown.child_token();
        let result = tokio::time::timeout(DEFAULT_CYCLE_TIMEOUT, self.run_sweep(cycle_ctx)).await;
        match result {
            Ok(Ok(())) => debug!("engine: sweep cycle completed"),
            Ok(Err(e)) => warn!("engine: sweep cycle failed: {e}"),
            Err(_) => warn!("engine: sweep cycle exceeded its {:?} budget", DEFAULT_CYCLE_TIMEOUT),
        }
    }

    /// Signals shutdown, waits for the watcher to exit, then stops both
    /// scanners with a bounded context (§4.5 `Stop`).
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        drop(tasks);

        let stop_ctx = CancellationToken::new();
        for scanner in [&self.icmp_scanner, &self.tcp_scanner] {
            let scanner = scanner.clone();
            let ctx = stop_ctx.clone();
            let stopped = tokio::time::timeout(STOP_TIMEOUT, scanner.stop(ctx)).await;
            match stopped {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("engine: scanner stop failed: {e}"),
                Err(_) => warn!("engine: scanner stop exceeded {:?}", STOP_TIMEOUT),
            }
        }
    }

    /// §4.5 `runSweep`.
    async fn run_sweep(&self, ctx: CancellationToken) -> Result<(), EngineError> {
        self.store.prune_results(Duration::ZERO);

        let cfg = self.config.read().await.clone();
        let targets = generate_targets(&cfg)?;
        self.processor.update_config(cfg.ports.len());

        let identity = CycleIdentity {
            agent_id: cfg.agent_id.clone(),
            poller_id: cfg.poller_id.clone(),
            partition: cfg.partition.clone(),
        };

        let (icmp_targets, tcp_targets): (Vec<Target>, Vec<Target>) = targets.iter().cloned().partition(|t| t.mode() == SweepMode::Icmp);

        let aggregators = Arc::new(DeviceAggregatorSet::new(identity.clone()));
        for t in &targets {
            aggregators.prepare_target(t, &target_source(t), &target_query_label(t));
        }

        let limit = effective_concurrency(cfg.concurrency, targets.len());
        self.icmp_scanner.set_concurrency(limit).await;
        self.tcp_scanner.set_concurrency(limit).await;

        // Registry pushes use a background context per §4.5/§9: they must
        // not be cancelled by the cycle context expiring at a tick boundary.
        // Handles are still collected and awaited here so the cycle doesn't
        // report "done" with writes still in flight.
        let background = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let icmp_pipeline = self.run_pipeline(self.icmp_scanner.clone(), ctx.clone(), icmp_targets, aggregators.clone(), identity.clone(), background.clone());
        let tcp_pipeline = self.run_pipeline(self.tcp_scanner.clone(), ctx.clone(), tcp_targets, aggregators.clone(), identity.clone(), background.clone());
        let (icmp_result, tcp_result) = tokio::join!(icmp_pipeline, tcp_pipeline);
        icmp_result?;
        tcp_result?;

        let aggregators = Arc::try_unwrap(aggregators).unwrap_or_else(|_| panic!("device aggregator set outlived both scan pipelines"));
        let updates = aggregators.finalize_all();
        for update in updates {
            let registry = self.registry.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = registry.update_device(update).await {
                    warn!("engine: finalized device update failed: {e}");
                }
            });
            background.lock().await.push(handle);
        }

        for handle in background.lock().await.drain(..) {
            let _ = handle.await;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self, scanner: Arc<dyn Scanner>, ctx: CancellationToken, targets: Vec<Target>, aggregators: Arc<DeviceAggregatorSet>,
        identity: CycleIdentity, background: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
    ) -> Result<(), EngineError> {
        if targets.is_empty() {
            return Ok(());
        }

        let mut stream = scanner
            .scan(ctx.clone(), targets)
            .await
            .map_err(|e| EngineError::Scanner(e.to_string()))?;

        while let Some(r) = stream.next().await {
            let outcome = tokio::time::timeout(PER_RESULT_TIMEOUT, self.process_result(r, &aggregators, &identity, &background)).await;
            if outcome.is_err() {
                warn!("engine: processResult exceeded its {:?} budget", PER_RESULT_TIMEOUT);
            }
        }

        Ok(())
    }

    /// §4.5 `processResult`. Per-result errors are logged and the result is
    /// dropped; they never escape to the pipeline (§7).
    async fn process_result(
        &self, mut r: ProbeResult, aggregators: &DeviceAggregatorSet, identity: &CycleIdentity,
        background: &tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    ) {
        if let Err(e) = self.processor.process(&mut r) {
            warn!("engine: process failed for {}: {e}", r.target.host);
            return;
        }

        let update = per_probe_update(&r, identity);

        if let Err(e) = self.store.save_result(r.clone()) {
            warn!("engine: save_result failed for {}: {e}", r.target.host);
        }

        aggregators.record(r);

        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = registry.update_device(update).await {
                debug!("engine: per-result registry update failed: {e}");
            }
        });
        background.lock().await.push(handle);
    }

    /// §4.5 `watchConfig`. Exits immediately if no KV store is configured.
    async fn watch_config(&self) {
        let Some(kv) = self.kv_store.clone() else {
            debug!("engine: no KV store configured, config watcher exiting");
            return;
        };

        let stream = match kv.watch(self.shutdown.clone(), self.kv_key.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("engine: config watch failed to start: {e}");
                return;
            }
        };
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                blob = stream.next() => {
                    let Some(blob) = blob else { return };
                    match Config::decode(&blob) {
                        Ok(new_cfg) => {
                            let mut cfg = self.config.write().await;
                            cfg.merge_from(new_cfg);
                            info!("engine: config updated from KV store");
                        }
                        Err(e) => warn!("engine: discarding malformed config update: {e}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use futures::stream::{
        self,
        BoxStream,
    };
    use sweep_core::DeviceTargetConfig;

    use super::*;
    use crate::traits::{
        KvError,
        RegistryError,
        ScannerError,
    };

    struct FakeScanner {
        available: bool,
    }

    #[async_trait]
    impl Scanner for FakeScanner {
        async fn scan(&self, _ctx: CancellationToken, targets: Vec<Target>) -> Result<BoxStream<'static, ProbeResult>, ScannerError> {
            let available = self.available;
            let results: Vec<ProbeResult> = targets
                .into_iter()
                .map(|t| ProbeResult::new(t, available, Duration::from_millis(1), 0.0))
                .collect();
            Ok(stream::iter(results).boxed())
        }

        async fn stop(&self, _ctx: CancellationToken) -> Result<(), ScannerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        updates: StdMutex<Vec<DeviceUpdate>>,
    }

    #[async_trait]
    impl DeviceRegistry for FakeRegistry {
        async fn update_device(&self, update: DeviceUpdate) -> Result<(), RegistryError> {
            self.updates.lock().expect("fake registry lock poisoned").push(update);
            Ok(())
        }
    }

    struct NeverKvStore;

    #[async_trait]
    impl KvStore for NeverKvStore {
        async fn watch(&self, _ctx: CancellationToken, _key: String) -> Result<BoxStream<'static, Vec<u8>>, KvError> {
            Ok(stream::pending().boxed())
        }
    }

    fn icmp_config() -> Config {
        Config {
            networks: vec!["10.0.0.5/32".into()],
            sweep_modes: vec!["icmp".into()],
            concurrency: 10,
            agent_id: "agent-1".into(),
            poller_id: "poller-1".into(),
            partition: "default".into(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn run_sweep_saves_results_and_pushes_finalized_device_update() {
        let store = sweep_store::Store::with_shard_count(4);
        let processor = sweep_processor::Processor::with_shard_count(4);
        let registry = Arc::new(FakeRegistry::default());

        let engine = SweepEngine::new(
            icmp_config(),
            Arc::new(FakeScanner { available: true }),
            Arc::new(FakeScanner { available: false }),
            store.clone(),
            processor.clone(),
            registry.clone(),
            None,
            "config",
        );

        engine.run_sweep(CancellationToken::new()).await.unwrap();

        let summary = store.get_sweep_summary().unwrap();
        assert_eq!(summary.available_hosts, 1);

        let updates = registry.updates.lock().unwrap();
        assert!(updates.iter().any(|u| u.is_available && u.ip == "10.0.0.5"));

        store.close().await;
    }

    #[tokio::test]
    async fn run_sweep_errors_when_no_target_source_is_configured() {
        let store = sweep_store::Store::with_shard_count(4);
        let processor = sweep_processor::Processor::with_shard_count(4);
        let registry = Arc::new(FakeRegistry::default());

        let engine = SweepEngine::new(
            Config::default(),
            Arc::new(FakeScanner { available: true }),
            Arc::new(FakeScanner { available: true }),
            store.clone(),
            processor,
            registry,
            None,
            "config",
        );

        let result = engine.run_sweep(CancellationToken::new()).await;
        assert!(result.is_err());
        store.close().await;
    }

    #[tokio::test]
    async fn watch_config_exits_immediately_without_a_kv_store() {
        let store = sweep_store::Store::with_shard_count(4);
        let processor = sweep_processor::Processor::with_shard_count(4);
        let registry = Arc::new(FakeRegistry::default());

        let engine = SweepEngine::new(Config::default(), Arc::new(FakeScanner { available: true }), Arc::new(FakeScanner { available: true }), store.clone(), processor, registry, None, "config");

        engine.watch_config().await;
        store.close().await;
    }

    #[tokio::test]
    async fn stop_joins_a_watcher_blocked_on_an_indefinite_kv_watch() {
        let store = sweep_store::Store::with_shard_count(4);
        let processor = sweep_processor::Processor::with_shard_count(4);
        let registry = Arc::new(FakeRegistry::default());

        let engine = SweepEngine::new(
            Config::default(),
            Arc::new(FakeScanner { available: true }),
            Arc::new(FakeScanner { available: true }),
            store.clone(),
            processor,
            registry,
            Some(Arc::new(NeverKvStore)),
            "config",
        );

        let watcher_engine = engine.clone();
        let watcher = tokio::spawn(async move { watcher_engine.watch_config().await });
        engine.tasks.lock().await.push(watcher);

        // stop() must signal shutdown and join the watcher even though
        // NeverKvStore's watch never yields on its own.
        engine.stop().await;
        store.close().await;
    }

    #[test]
    fn concurrency_is_floored_at_five_and_capped_by_config() {
        assert_eq!(effective_concurrency(100, 40), 5);
        assert_eq!(effective_concurrency(2, 40), 2);
        assert_eq!(effective_concurrency(100, 1000), 100);
    }

    #[test]
    fn device_target_entry_resolves_sweep_modes_through_config() {
        let cfg = Config {
            device_targets: vec![DeviceTargetConfig {
                network: "10.0.0.0/31".into(),
                ..DeviceTargetConfig::default()
            }],
            sweep_modes: vec!["icmp".into()],
            ..Config::default()
        };
        assert_eq!(cfg.resolve_sweep_modes(&cfg.device_targets[0]), vec!["icmp".to_string()]);
    }
}
