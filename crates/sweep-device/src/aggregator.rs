use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use sweep_core::{
    DeviceUpdate,
    ProbeResult,
};

/// Identifiers stamped onto every `DeviceUpdate` produced in one sweep
/// cycle, carried from the live `Config` (§6).
#[derive(Debug, Clone, Default)]
pub struct CycleIdentity {
    pub agent_id: String,
    pub poller_id: String,
    pub partition: String,
}

struct AggregatorState {
    results: Vec<ProbeResult>,
    finalized: bool,
}

/// A transient, per-device, per-cycle accumulator (§4.4). Created at cycle
/// start from generated targets, records every matching probe, and is
/// destroyed after `finalize()` pushes the resulting `DeviceUpdate`.
pub struct DeviceAggregator {
    device_key: String,
    /// Union of every address the device is known by, in first-seen order.
    ips: Mutex<Vec<String>>,
    primary_ip: String,
    source: String,
    query_label: String,
    state: Mutex<AggregatorState>,
}

impl DeviceAggregator {
    pub fn new(device_key: String, ips: Vec<String>, primary_ip: String, source: String, query_label: String) -> Self {
        Self {
            device_key,
            ips: Mutex::new(ips),
            primary_ip,
            source,
            query_label,
            state: Mutex::new(AggregatorState {
                results: Vec::new(),
                finalized: false,
            }),
        }
    }

    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    pub fn ips(&self) -> Vec<String> {
        self.ips.lock().expect("aggregator lock poisoned").clone()
    }

    /// Extends `ips` with any addresses from `extra` not already present,
    /// preserving first-seen order (§4.5 step 4).
    pub fn merge_ips(&self, extra: &[String]) {
        let mut ips = self.ips.lock().expect("aggregator lock poisoned");
        for ip in extra {
            if !ips.contains(ip) {
                ips.push(ip.clone());
            }
        }
    }

    /// Appends `r` to this device's recorded probes under the aggregator's
    /// lock (§4.4 `Record`).
    pub fn record(&self, r: ProbeResult) {
        let mut state = self.state.lock().expect("aggregator lock poisoned");
        state.results.push(r);
    }

    /// Computes the availability verdict and metadata envelope (§4.4
    /// `Finalize`): `is_available := ∃ r ∈ R : r.available = true`, and
    /// nothing else — any successful probe against any address/protocol
    /// makes the device available.
    pub fn finalize(&self, identity: &CycleIdentity) -> DeviceUpdate {
        let mut state = self.state.lock().expect("aggregator lock poisoned");
        state.finalized = true;
        let results = &state.results;

        let total = results.len();
        let available_count = results.iter().filter(|r| r.available).count();
        let unavailable_count = total - available_count;
        let is_available = available_count > 0;

        let percent = if total == 0 {
            0.0
        } else {
            (available_count as f64 / total as f64) * 100.0
        };

        let all_ips: Vec<&str> = results.iter().map(|r| r.target.host.as_str()).collect();
        let available_ips: Vec<&str> = results.iter().filter(|r| r.available).map(|r| r.target.host.as_str()).collect();
        let unavailable_ips: Vec<&str> = results.iter().filter(|r| !r.available).map(|r| r.target.host.as_str()).collect();

        let mut metadata: HashMap<String, String> = HashMap::new();
        for r in results.iter() {
            for (k, v) in &r.target.metadata {
                if let Some(s) = v.as_str() {
                    metadata.insert(k.clone(), s.to_string());
                }
            }
        }

        metadata.insert("scan_availability_percent".to_string(), format!("{percent:.1}"));
        metadata.insert("scan_available_count".to_string(), available_count.to_string());
        metadata.insert("scan_unavailable_count".to_string(), unavailable_count.to_string());
        metadata.insert("scan_all_ips".to_string(), all_ips.join(","));
        metadata.insert("scan_available_ips".to_string(), available_ips.join(","));
        metadata.insert("scan_unavailable_ips".to_string(), unavailable_ips.join(","));

        // The most recently recorded probe stands in for the single-value
        // sweep_mode/port/response_time/packet_loss fields the metadata
        // table in §4.4 asks for; see DESIGN.md for why "most recent" was
        // chosen over "first" or "any successful" to resolve this.
        if let Some(last) = results.last() {
            metadata.insert("sweep_mode".to_string(), last.target.mode().as_str().to_string());
            if last.target.port != 0 {
                metadata.insert("port".to_string(), last.target.port.to_string());
            }
            metadata.insert("response_time".to_string(), format!("{}", last.resp_time.as_millis()));
            metadata.insert("packet_loss".to_string(), format!("{}", last.packet_loss));
        }

        metadata.insert("agent_id".to_string(), identity.agent_id.clone());
        metadata.insert("poller_id".to_string(), identity.poller_id.clone());
        metadata.insert("partition".to_string(), identity.partition.clone());
        metadata.insert("source".to_string(), self.source.clone());
        if !self.query_label.is_empty() {
            metadata.insert("query_label".to_string(), self.query_label.clone());
        }

        DeviceUpdate {
            agent_id: identity.agent_id.clone(),
            poller_id: identity.poller_id.clone(),
            partition: identity.partition.clone(),
            device_id: format!("{}:{}", identity.partition, self.primary_ip),
            source: self.source.clone(),
            ip: self.primary_ip.clone(),
            timestamp: Utc::now(),
            is_available,
            metadata,
            confidence: if total == 0 { 0.0 } else { available_count as f64 / total as f64 },
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().expect("aggregator lock poisoned").finalized
    }
}
