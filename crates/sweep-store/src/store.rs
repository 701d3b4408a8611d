use std::collections::HashMap;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::{
    Arc,
    RwLock,
};
use std::time::Duration as StdDuration;

use chrono::{
    DateTime,
    Duration as ChronoDuration,
    Utc,
};
use log::{
    debug,
    info,
};
use sweep_core::{
    HostResult,
    IcmpStatus,
    PortCount,
    PortResult,
    ProbeResult,
    SweepMode,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::shard::{
    default_shard_count,
    shard_index,
};

/// Background cleanup cadence and retention window (§4.2).
const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(10 * 60);
const CLEANUP_WINDOW: StdDuration = StdDuration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoreKey {
    host: String,
    port: u16,
    mode: SweepMode,
}

/// A conjunctive filter over `GetResults`. A `None` field is skipped;
/// `filter == None` (pass `None` to `get_results`) matches everything.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub available: Option<bool>,
}

impl ResultFilter {
    fn matches(&self, r: &ProbeResult) -> bool {
        if let Some(start) = self.start_time {
            if r.last_seen < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if r.last_seen > end {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if &r.target.host != host {
                return false;
            }
        }
        if let Some(port) = self.port {
            if r.target.port != port {
                return false;
            }
        }
        if let Some(available) = self.available {
            if r.available != available {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub total_hosts: usize,
    pub available_hosts: usize,
    /// Unix timestamp (seconds) of the most recent `last_seen` across all
    /// stored results; `0` if the store is empty.
    pub last_sweep: i64,
    pub hosts: Vec<HostResult>,
    pub ports: Vec<PortCount>,
}

struct Shard {
    entries: RwLock<HashMap<StoreKey, ProbeResult>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

/// A sharded, deduplicating in-memory map of the most recent `ProbeResult`
/// for each `(host, port, mode)` key (§4.2).
///
/// Save never fails locally (I4 and the "Failure semantics" note); prune and
/// cleanup never fail either. A background task prunes entries older than a
/// 30-minute window every 10 minutes until `close()` is called.
pub struct Store {
    shards: Vec<Shard>,
    shard_count: usize,
    cleanup_handle: AsyncMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Store {
    /// Builds a store and starts its background cleanup task. Must be
    /// called from inside a running Tokio runtime.
    pub fn new() -> Arc<Self> {
        Self::with_shard_count(default_shard_count())
    }

    pub fn with_shard_count(shard_count: usize) -> Arc<Self> {
        let shard_count = shard_count.clamp(4, 16);
        let store = Arc::new(Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            shard_count,
            cleanup_handle: AsyncMutex::new(None),
            closed: AtomicBool::new(false),
        });

        let background = store.clone();
        let handle = tokio::spawn(async move { background.run_cleanup_loop().await });
        // try_lock is safe here: nothing else can reach `cleanup_handle`
        // before this constructor returns.
        if let Ok(mut guard) = store.cleanup_handle.try_lock() {
            *guard = Some(handle);
        }

        store
    }

    async fn run_cleanup_loop(&self) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            debug!("store: running periodic cleanup");
            self.prune_results(CLEANUP_WINDOW);
        }
    }

    /// Upserts `r` under its `(host, port, mode)` key. Never fails.
    pub fn save_result(&self, r: ProbeResult) -> Result<(), StoreError> {
        let port = clamp_port(r.target.port as i32);
        let key = StoreKey {
            host: r.target.host.clone(),
            port,
            mode: r.target.mode(),
        };
        let idx = shard_index(&key.host, key.mode, key.port, self.shard_count);
        let mut entries = self.shards[idx].entries.write().expect("shard lock poisoned");
        entries.insert(key, r);
        Ok(())
    }

    /// Returns a copy of every stored result matching `filter` (`None`
    /// matches everything).
    pub fn get_results(&self, filter: Option<&ResultFilter>) -> Result<Vec<ProbeResult>, StoreError> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let entries = shard.entries.read().expect("shard lock poisoned");
            for r in entries.values() {
                if filter.map(|f| f.matches(r)).unwrap_or(true) {
                    out.push(r.clone());
                }
            }
        }
        Ok(out)
    }

    /// Aggregates every shard into a `SweepSummary`, building fresh
    /// `HostResult` values from the raw per-key results (independent of,
    /// and simpler than, the processor's incremental aggregate).
    pub fn get_sweep_summary(&self) -> Result<SweepSummary, StoreError> {
        let mut by_host: HashMap<String, HostResult> = HashMap::new();
        let mut port_counts: HashMap<u16, usize> = HashMap::new();
        let mut last_sweep = 0i64;

        for shard in &self.shards {
            let entries = shard.entries.read().expect("shard lock poisoned");
            for r in entries.values() {
                last_sweep = last_sweep.max(r.last_seen.timestamp());

                let host = by_host.entry(r.target.host.clone()).or_insert_with(|| HostResult {
                    host: r.target.host.clone(),
                    first_seen: r.first_seen,
                    last_seen: r.last_seen,
                    ..HostResult::default()
                });

                host.first_seen = host.first_seen.min(r.first_seen);
                host.last_seen = host.last_seen.max(r.last_seen);
                if r.available {
                    host.available = true;
                }

                match r.target.mode() {
                    SweepMode::Icmp => {
                        host.icmp_status = Some(IcmpStatus {
                            available: r.available,
                            packet_loss: r.packet_loss,
                            round_trip: r.resp_time,
                        });
                    }
                    SweepMode::Tcp => {
                        let port = r.target.port;
                        let port_result = PortResult {
                            port,
                            available: r.available,
                            resp_time: r.resp_time,
                            service: String::new(),
                        };
                        if let Some(&i) = host.port_map.get(&port) {
                            host.port_results[i] = port_result;
                        } else {
                            host.port_map.insert(port, host.port_results.len());
                            host.port_results.push(port_result);
                        }
                        if r.available {
                            *port_counts.entry(port).or_insert(0) += 1;
                        }
                    }
                }
            }
        }

        let available_hosts = by_host.values().filter(|h| h.available).count();
        let mut ports: Vec<PortCount> = port_counts
            .into_iter()
            .map(|(port, count)| PortCount { port, count })
            .collect();
        ports.sort_by_key(|p| p.port);

        Ok(SweepSummary {
            total_hosts: by_host.len(),
            available_hosts,
            last_sweep,
            hosts: by_host.into_values().collect(),
            ports,
        })
    }

    /// Retains only entries whose `last_seen` is strictly after `now - age`.
    /// `age == Duration::ZERO` clears every shard (cycle-fresh semantics,
    /// §4.5 step 1).
    pub fn prune_results(&self, age: StdDuration) {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(age).unwrap_or_else(|_| ChronoDuration::zero());
        for shard in &self.shards {
            let mut entries = shard.entries.write().expect("shard lock poisoned");
            entries.retain(|_, r| r.last_seen > cutoff);
        }
    }

    /// Stops the background cleanup task. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("store: closing");
        if let Some(handle) = self.cleanup_handle.lock().await.take() {
            handle.abort();
        }
    }
}

fn clamp_port(port: i32) -> u16 {
    if (0..=u16::MAX as i32).contains(&port) {
        port as u16
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sweep_core::{
        SweepMode,
        Target,
    };

    use super::*;

    fn make_result(host: &str, mode: SweepMode, port: u16, available: bool) -> ProbeResult {
        ProbeResult::new(Target::new(host, port, mode), available, Duration::from_millis(5), 0.0)
    }

    #[tokio::test]
    async fn saving_twice_with_same_key_produces_one_entry() {
        let store = Store::with_shard_count(4);
        store.save_result(make_result("10.0.0.1", SweepMode::Tcp, 22, true)).unwrap();
        store.save_result(make_result("10.0.0.1", SweepMode::Tcp, 22, false)).unwrap();

        let results = store.get_results(None).unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].available);
        store.close().await;
    }

    #[tokio::test]
    async fn prune_zero_then_save_tracks_only_latest_cycle() {
        let store = Store::with_shard_count(4);
        store.save_result(make_result("10.0.0.1", SweepMode::Icmp, 0, true)).unwrap();

        store.prune_results(Duration::ZERO);
        let summary = store.get_sweep_summary().unwrap();
        assert_eq!(summary.available_hosts, 0);

        store.save_result(make_result("10.0.0.1", SweepMode::Icmp, 0, true)).unwrap();
        let summary = store.get_sweep_summary().unwrap();
        assert_eq!(summary.available_hosts, 1);
        store.close().await;
    }

    #[tokio::test]
    async fn sticky_availability_regression_requires_prune_between_cycles() {
        let store = Store::with_shard_count(4);
        store.save_result(make_result("10.0.0.2", SweepMode::Tcp, 80, true)).unwrap();

        // New cycle without pruning: a failing ICMP probe should not erase
        // the still-present successful TCP entry (T3/P5 regression guard).
        store.save_result(make_result("10.0.0.2", SweepMode::Icmp, 0, false)).unwrap();
        let summary = store.get_sweep_summary().unwrap();
        assert!(summary.available_hosts == 1);

        store.prune_results(Duration::ZERO);
        store.save_result(make_result("10.0.0.2", SweepMode::Icmp, 0, false)).unwrap();
        let summary = store.get_sweep_summary().unwrap();
        assert_eq!(summary.available_hosts, 0);
        store.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = Store::with_shard_count(4);
        store.close().await;
        store.close().await;
    }

    #[tokio::test]
    async fn filter_skips_zero_valued_predicates() {
        let store = Store::with_shard_count(4);
        store.save_result(make_result("10.0.0.1", SweepMode::Tcp, 22, true)).unwrap();
        store.save_result(make_result("10.0.0.2", SweepMode::Tcp, 22, false)).unwrap();

        let filter = ResultFilter {
            available: Some(true),
            ..Default::default()
        };
        let results = store.get_results(Some(&filter)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target.host, "10.0.0.1");
        store.close().await;
    }

    #[test]
    fn out_of_range_port_is_accepted_and_clamped_to_zero() {
        assert_eq!(clamp_port(70000), 0);
        assert_eq!(clamp_port(-1), 0);
        assert_eq!(clamp_port(22), 22);
    }
}
