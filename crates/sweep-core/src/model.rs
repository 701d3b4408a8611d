use std::collections::HashMap;
use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

/// Which protocol a [`Target`] should be probed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    Icmp,
    Tcp,
}

impl SweepMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepMode::Icmp => "icmp",
            SweepMode::Tcp => "tcp",
        }
    }
}

impl std::str::FromStr for SweepMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" => Ok(SweepMode::Icmp),
            "tcp" => Ok(SweepMode::Tcp),
            other => Err(format!("unknown sweep mode: {other}")),
        }
    }
}

/// One address (and, for TCP, one port) the sweep engine intends to probe.
///
/// `metadata` carries provenance (`network`, `total_hosts`, `source`,
/// `query_label`, device-grouping ids, `agent_id`, `poller_id`, `partition`)
/// through to the device aggregator; it is opaque to the scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    /// 0 for ICMP targets.
    pub port: u16,
    pub mode: Option<SweepMode>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, mode: SweepMode) -> Self {
        Self {
            host: host.into(),
            port,
            mode: Some(mode),
            metadata: HashMap::new(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn mode(&self) -> SweepMode {
        self.mode.unwrap_or(SweepMode::Icmp)
    }
}

/// A single probe outcome produced by a `Scanner`.
///
/// `first_seen`/`last_seen` are filled in by the processor at intake, not by
/// the scanner.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: Target,
    pub available: bool,
    pub resp_time: Duration,
    /// Packet loss percentage, `0.0..=100.0`.
    pub packet_loss: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ProbeResult {
    /// Builds a result with `first_seen == last_seen == now`; the processor
    /// overwrites both on intake per the `HostResult` lifecycle rules.
    pub fn new(target: Target, available: bool, resp_time: Duration, packet_loss: f64) -> Self {
        let now = Utc::now();
        Self {
            target,
            available,
            resp_time,
            packet_loss,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// A single TCP port's outcome for a host, pool-allocated by the processor.
#[derive(Debug, Clone, Default)]
pub struct PortResult {
    pub port: u16,
    pub available: bool,
    pub resp_time: Duration,
    pub service: String,
}

impl PortResult {
    /// Resets every field to its default so the value can be returned to a
    /// pool and reused without deallocating.
    pub fn reset(&mut self) {
        self.port = 0;
        self.available = false;
        self.resp_time = Duration::ZERO;
        self.service.clear();
    }
}

/// Aggregate ICMP status for a host within the current sweep cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpStatus {
    pub available: bool,
    pub packet_loss: f64,
    pub round_trip: Duration,
}

/// The processor's per-host aggregate.
///
/// `port_results` and `port_map` both refer to the same underlying
/// `PortResult` values (invariant I2): every port in `port_map` also
/// appears, by index, in `port_results`.
#[derive(Debug, Clone, Default)]
pub struct HostResult {
    pub host: String,
    pub available: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub icmp_status: Option<IcmpStatus>,
    pub port_results: Vec<PortResult>,
    pub port_map: HashMap<u16, usize>,
    pub response_time: Duration,
}

impl HostResult {
    /// Clears content but keeps the backing allocations' capacity, per the
    /// pool-reuse lifecycle (§3 "Lifecycles").
    pub fn clear_for_reuse(&mut self) {
        self.host.clear();
        self.available = false;
        self.icmp_status = None;
        self.port_results.clear();
        self.port_map.clear();
        self.response_time = Duration::ZERO;
    }

    pub fn port_result(&self, port: u16) -> Option<&PortResult> {
        self.port_map.get(&port).map(|&i| &self.port_results[i])
    }
}

/// How many hosts had a given TCP port open, used by both the store's and
/// the processor's summary views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCount {
    pub port: u16,
    pub count: usize,
}

/// The outward-facing availability verdict pushed to the device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub agent_id: String,
    pub poller_id: String,
    pub partition: String,
    pub device_id: String,
    pub source: String,
    pub ip: String,
    pub timestamp: DateTime<Utc>,
    pub is_available: bool,
    pub metadata: HashMap<String, String>,
    pub confidence: f64,
}
