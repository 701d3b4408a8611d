use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::atomic::{
    AtomicU64,
    AtomicUsize,
    Ordering,
};
use std::sync::{
    Arc,
    Mutex,
    RwLock,
};
use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use log::debug;
use sweep_core::{
    HostResult,
    IcmpStatus,
    PortCount,
    PortResult,
    ProbeResult,
    SweepMode,
};
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::pool::Pool;
use crate::shard::{
    default_shard_count,
    shard_index,
};

/// Initial port-array capacity for a freshly observed host (§4.3).
const EXPECTED_PORTS_PER_HOST: usize = 5;

/// Above this many total pooled ports, `cleanup()` discards shards wholesale
/// instead of recycling each host/port back into the pools (§4.3
/// "fast mode").
const FAST_MODE_PORT_THRESHOLD: usize = 50_000;

/// Bound on how many idle objects each pool keeps around.
const POOL_MAX_IDLE: usize = 4096;

struct ProcessorShard {
    host_map: HashMap<String, HostResult>,
    port_counts: HashMap<u16, usize>,
    last_sweep_time: DateTime<Utc>,
    first_seen_times: HashMap<String, DateTime<Utc>>,
}

impl ProcessorShard {
    fn new() -> Self {
        Self {
            host_map: HashMap::new(),
            port_counts: HashMap::new(),
            last_sweep_time: DateTime::<Utc>::MIN_UTC,
            first_seen_times: HashMap::new(),
        }
    }
}

/// A materialized or streaming snapshot of the processor's state (§4.3
/// `GetSummary`/`GetSummaryStream`).
#[derive(Debug, Clone, Default)]
pub struct ProcessorSummary {
    pub total_hosts: usize,
    pub available_hosts: usize,
    pub icmp_hosts: usize,
    pub hosts: Vec<HostResult>,
    pub ports: Vec<PortCount>,
}

/// The sharded per-host aggregate (§4.3). Each shard holds a `host_map`
/// keyed by host behind one read-write lock; `HostResult`/`PortResult`
/// allocations are drawn from pools shared across all shards.
pub struct Processor {
    shards: Vec<RwLock<ProcessorShard>>,
    shard_count: usize,
    host_pool: Arc<Pool<HostResult>>,
    port_pool: Arc<Pool<PortResult>>,
    configured_port_count: AtomicUsize,
    total_hosts_counter: AtomicU64,
    processed_networks: Mutex<HashSet<String>>,
}

impl Processor {
    pub fn new() -> Arc<Self> {
        Self::with_shard_count(default_shard_count())
    }

    pub fn with_shard_count(shard_count: usize) -> Arc<Self> {
        let shard_count = shard_count.clamp(4, 16);
        Arc::new(Self {
            shards: (0..shard_count).map(|_| RwLock::new(ProcessorShard::new())).collect(),
            shard_count,
            host_pool: Arc::new(Pool::new(POOL_MAX_IDLE)),
            port_pool: Arc::new(Pool::new(POOL_MAX_IDLE)),
            configured_port_count: AtomicUsize::new(EXPECTED_PORTS_PER_HOST),
            total_hosts_counter: AtomicU64::new(0),
            processed_networks: Mutex::new(HashSet::new()),
        })
    }

    /// Atomically swaps the configured port count. Never invalidates
    /// existing hosts; future TCP results trigger grow-on-demand instead of
    /// data loss (§4.3 `UpdateConfig`).
    pub fn update_config(&self, port_count: usize) {
        self.configured_port_count.store(port_count.max(EXPECTED_PORTS_PER_HOST), Ordering::Release);
    }

    pub fn total_hosts_seen(&self) -> u64 {
        self.total_hosts_counter.load(Ordering::Acquire)
    }

    /// The hot path (§4.3 `Process`). Mutates `r.first_seen`/`r.last_seen`
    /// to mirror the host's values so a subsequent `Store::save_result`
    /// sees the processor's timestamps.
    pub fn process(&self, r: &mut ProbeResult) -> Result<(), ProcessError> {
        let now = Utc::now();
        let idx = shard_index(&r.target.host, self.shard_count);
        let mut shard = self.shards[idx].write().expect("shard lock poisoned");

        shard.last_sweep_time = shard.last_sweep_time.max(now);

        self.maybe_count_network_total(r);

        let first_seen_carry = shard.first_seen_times.get(&r.target.host).copied();
        let is_new = !shard.host_map.contains_key(&r.target.host);

        if is_new {
            let mut host = self.host_pool.acquire();
            host.clear_for_reuse();
            host.host = r.target.host.clone();
            host.first_seen = first_seen_carry.unwrap_or(now);
            if host.port_results.capacity() < EXPECTED_PORTS_PER_HOST {
                host.port_results.reserve_exact(EXPECTED_PORTS_PER_HOST - host.port_results.capacity());
            }
            shard.first_seen_times.insert(r.target.host.clone(), host.first_seen);
            shard.host_map.insert(r.target.host.clone(), host);
        }

        let host = shard
            .host_map
            .get_mut(&r.target.host)
            .expect("host_map entry inserted above");
        host.last_seen = now;

        r.first_seen = host.first_seen;
        r.last_seen = host.last_seen;

        match r.target.mode() {
            SweepMode::Icmp => {
                let status = host.icmp_status.get_or_insert_with(IcmpStatus::default);
                if r.available {
                    host.available = true;
                    status.available = true;
                    status.packet_loss = 0.0;
                    status.round_trip = r.resp_time;
                } else {
                    status.available = false;
                    status.packet_loss = 100.0;
                    status.round_trip = Duration::ZERO;
                }
            }
            SweepMode::Tcp => {
                if r.available {
                    host.available = true;
                    let port = r.target.port;
                    if let Some(&i) = host.port_map.get(&port) {
                        host.port_results[i].available = true;
                        host.port_results[i].resp_time = r.resp_time;
                    } else {
                        let configured = self.configured_port_count.load(Ordering::Acquire);
                        if host.port_results.len() == host.port_results.capacity()
                            && configured > host.port_results.capacity()
                        {
                            let mut grown = Vec::with_capacity(configured);
                            grown.append(&mut host.port_results);
                            host.port_results = grown;
                        }
                        let mut port_result = self.port_pool.acquire();
                        port_result.reset();
                        port_result.port = port;
                        port_result.available = true;
                        port_result.resp_time = r.resp_time;
                        host.port_results.push(port_result);
                        host.port_map.insert(port, host.port_results.len() - 1);
                        *shard.port_counts.entry(port).or_insert(0) += 1;
                    }
                }
            }
        }

        if r.resp_time > Duration::ZERO {
            shard
                .host_map
                .get_mut(&r.target.host)
                .expect("host present")
                .response_time = r.resp_time;
        }

        Ok(())
    }

    fn maybe_count_network_total(&self, r: &ProbeResult) {
        let (Some(network), Some(total_hosts)) = (
            r.target.metadata_str("network"),
            r.target.metadata.get("total_hosts").and_then(|v| v.as_u64()),
        ) else {
            return;
        };

        let mut processed = self.processed_networks.lock().expect("processed_networks poisoned");
        if processed.insert(network.to_string()) {
            self.total_hosts_counter.fetch_add(total_hosts, Ordering::AcqRel);
        }
    }

    /// A materialized, deep-copied snapshot (§4.3 `GetSummary`). No pointer
    /// in the returned `hosts` aliases processor-internal state — every
    /// `HostResult`, `PortResult`, and `port_map` entry is a fresh owned
    /// value produced by `HostResult::clone` (P2/P3).
    pub async fn get_summary(&self, token: &CancellationToken) -> Result<ProcessorSummary, ProcessError> {
        if token.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut tasks = Vec::with_capacity(self.shard_count);
        for idx in 0..self.shard_count {
            let snapshot = self.snapshot_shard(idx);
            tasks.push(tokio::spawn(async move { snapshot }));
        }

        let mut summary = ProcessorSummary::default();
        let mut port_counts: HashMap<u16, usize> = HashMap::new();
        for task in tasks {
            let (hosts, shard_ports) = task.await.expect("shard snapshot task panicked");
            for host in hosts {
                summary.available_hosts += host.available as usize;
                summary.icmp_hosts += host.icmp_status.map(|s| s.available).unwrap_or(false) as usize;
                summary.hosts.push(host);
            }
            for (port, count) in shard_ports {
                *port_counts.entry(port).or_insert(0) += count;
            }
        }
        summary.total_hosts = summary.hosts.len();
        summary.ports = {
            let mut v: Vec<PortCount> = port_counts.into_iter().map(|(port, count)| PortCount { port, count }).collect();
            v.sort_by_key(|p| p.port);
            v
        };

        Ok(summary)
    }

    /// Streams `HostResult` snapshots onto `sender` as shards are processed
    /// in parallel, returning a summary with `hosts` left empty (§4.3
    /// `GetSummaryStream`). Honors cancellation at the send boundary.
    pub async fn get_summary_stream(
        &self, token: &CancellationToken, sender: tokio::sync::mpsc::Sender<HostResult>,
    ) -> Result<ProcessorSummary, ProcessError> {
        if token.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut tasks = Vec::with_capacity(self.shard_count);
        for idx in 0..self.shard_count {
            let (hosts, shard_ports) = self.snapshot_shard(idx);
            let sender = sender.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                for host in &hosts {
                    if token.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        send_result = sender.send(host.clone()) => {
                            if send_result.is_err() {
                                break;
                            }
                        }
                    }
                }
                (hosts, shard_ports)
            }));
        }

        let mut summary = ProcessorSummary::default();
        let mut port_counts: HashMap<u16, usize> = HashMap::new();
        for task in tasks {
            let (hosts, shard_ports) = task.await.expect("shard stream task panicked");
            summary.total_hosts += hosts.len();
            summary.available_hosts += hosts.iter().filter(|h| h.available).count();
            summary.icmp_hosts += hosts
                .iter()
                .filter(|h| h.icmp_status.map(|s| s.available).unwrap_or(false))
                .count();
            for (port, count) in shard_ports {
                *port_counts.entry(port).or_insert(0) += count;
            }
        }
        summary.ports = {
            let mut v: Vec<PortCount> = port_counts.into_iter().map(|(port, count)| PortCount { port, count }).collect();
            v.sort_by_key(|p| p.port);
            v
        };

        drop(sender);
        Ok(summary)
    }

    fn snapshot_shard(&self, idx: usize) -> (Vec<HostResult>, Vec<(u16, usize)>) {
        let shard = self.shards[idx].read().expect("shard lock poisoned");
        let hosts: Vec<HostResult> = shard.host_map.values().cloned().collect();
        let ports: Vec<(u16, usize)> = shard.port_counts.iter().map(|(&p, &c)| (p, c)).collect();
        (hosts, ports)
    }

    /// Drains every shard, returning pooled objects where the fast-mode
    /// threshold is not exceeded (§4.3 `cleanup`).
    pub fn cleanup(&self) {
        let total_ports: usize = (0..self.shard_count)
            .map(|idx| {
                self.shards[idx]
                    .read()
                    .expect("shard lock poisoned")
                    .host_map
                    .values()
                    .map(|h| h.port_results.len())
                    .sum::<usize>()
            })
            .sum();

        let fast_mode = total_ports > FAST_MODE_PORT_THRESHOLD;
        if fast_mode {
            debug!("processor: cleanup in fast mode ({total_ports} pooled ports)");
        }

        for idx in 0..self.shard_count {
            let mut shard = self.shards[idx].write().expect("shard lock poisoned");
            if !fast_mode {
                for (_, mut host) in shard.host_map.drain() {
                    for port_result in host.port_results.drain(..) {
                        self.port_pool.release(port_result);
                    }
                    host.port_map.clear();
                    self.host_pool.release(host);
                }
            } else {
                shard.host_map.clear();
            }
            shard.port_counts = HashMap::new();
        }
        self.processed_networks.lock().expect("processed_networks poisoned").clear();
        self.total_hosts_counter.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use sweep_core::{
        SweepMode,
        Target,
    };
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn icmp(host: &str, available: bool) -> ProbeResult {
        ProbeResult::new(Target::new(host, 0, SweepMode::Icmp), available, Duration::from_millis(3), 0.0)
    }

    fn tcp(host: &str, port: u16, available: bool) -> ProbeResult {
        ProbeResult::new(Target::new(host, port, SweepMode::Tcp), available, Duration::from_millis(3), 0.0)
    }

    #[tokio::test]
    async fn icmp_success_marks_host_available() {
        let proc = Processor::with_shard_count(4);
        let mut r = icmp("10.0.0.1", true);
        proc.process(&mut r).unwrap();

        let summary = proc.get_summary(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.available_hosts, 1);
        assert_eq!(summary.icmp_hosts, 1);
        assert!(r.first_seen <= r.last_seen);
    }

    #[tokio::test]
    async fn tcp_results_grow_on_demand_beyond_five_ports() {
        let proc = Processor::with_shard_count(4);
        proc.update_config(8);

        for port in 1000..1008u16 {
            let mut r = tcp("10.0.0.2", port, true);
            proc.process(&mut r).unwrap();
        }

        let summary = proc.get_summary(&CancellationToken::new()).await.unwrap();
        let host = summary.hosts.into_iter().find(|h| h.host == "10.0.0.2").unwrap();
        assert_eq!(host.port_results.len(), 8);
        for (port, &idx) in &host.port_map {
            assert_eq!(host.port_results[idx].port, *port);
        }
    }

    #[tokio::test]
    async fn snapshot_is_a_deep_copy() {
        let proc = Processor::with_shard_count(4);
        let mut r = tcp("10.0.0.3", 22, true);
        proc.process(&mut r).unwrap();

        let mut summary = proc.get_summary(&CancellationToken::new()).await.unwrap();
        // Mutating the snapshot must not be visible in a later snapshot.
        summary.hosts[0].port_results[0].service = "mutated".into();

        let summary2 = proc.get_summary(&CancellationToken::new()).await.unwrap();
        assert_ne!(summary2.hosts[0].port_results[0].service, "mutated");
    }

    #[tokio::test]
    async fn get_summary_honors_cancellation_before_work_begins() {
        let proc = Processor::with_shard_count(4);
        let token = CancellationToken::new();
        token.cancel();
        let result = proc.get_summary(&token).await;
        assert!(matches!(result, Err(ProcessError::Cancelled)));
    }

    #[tokio::test]
    async fn cleanup_returns_empty_summary() {
        let proc = Processor::with_shard_count(4);
        let mut r = tcp("10.0.0.4", 22, true);
        proc.process(&mut r).unwrap();
        proc.cleanup();

        let summary = proc.get_summary(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.total_hosts, 0);
        assert!(summary.hosts.is_empty());
        assert!(summary.ports.is_empty());
    }

    #[tokio::test]
    async fn total_hosts_counted_once_per_network() {
        let proc = Processor::with_shard_count(4);
        let mut r = icmp("10.0.0.5", true);
        r.target.metadata.insert("network".into(), json!("10.0.0.0/24"));
        r.target.metadata.insert("total_hosts".into(), json!(254));
        proc.process(&mut r).unwrap();

        let mut r2 = icmp("10.0.0.6", true);
        r2.target.metadata.insert("network".into(), json!("10.0.0.0/24"));
        r2.target.metadata.insert("total_hosts".into(), json!(254));
        proc.process(&mut r2).unwrap();

        assert_eq!(proc.total_hosts_seen(), 254);
    }

    #[tokio::test]
    async fn stream_summary_emits_hosts_and_leaves_hosts_field_empty() {
        let proc = Processor::with_shard_count(4);
        let mut r = tcp("10.0.0.7", 22, true);
        proc.process(&mut r).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let token = CancellationToken::new();
        let summary = proc.get_summary_stream(&token, tx).await.unwrap();

        assert!(summary.hosts.is_empty());
        assert_eq!(summary.total_hosts, 1);

        let mut received = Vec::new();
        while let Some(h) = rx.recv().await {
            received.push(h);
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].host, "10.0.0.7");
    }
}
