use std::collections::HashMap;
use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::error::ConfigError;

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.is_empty() {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if value.is_zero() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }
}

fn default_duration() -> Duration {
    Duration::ZERO
}

/// A per-device-target entry (§4.1 "Device targets").
///
/// Per-entry `sweep_modes`, when empty, falls back to the global
/// `Config::sweep_modes` at target-generation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTargetConfig {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub sweep_modes: Vec<String>,
    #[serde(default)]
    pub query_label: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcmpSettings {
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(
        default = "default_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub max_batch: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpSettings {
    #[serde(default)]
    pub concurrency: u32,
    #[serde(
        default = "default_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub max_batch: u32,
    #[serde(default)]
    pub route_discovery_host: String,
    #[serde(default)]
    pub ring_block_size: u32,
    #[serde(default)]
    pub ring_block_count: u32,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub suppress_rst_reply: bool,
}

/// The sweeper's full configuration (§3, §6).
///
/// Decoded tolerantly: unknown fields are ignored, missing numeric fields
/// default to zero, and duration fields accept human strings (`"5m"`) with
/// an empty string decoding to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub device_targets: Vec<DeviceTargetConfig>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub sweep_modes: Vec<String>,
    #[serde(
        default = "default_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    #[serde(default)]
    pub concurrency: u32,
    #[serde(
        default = "default_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub icmp_count: u32,
    #[serde(default)]
    pub max_idle: u32,
    #[serde(
        default = "default_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_lifetime: Duration,
    #[serde(
        default = "default_duration",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub idle_timeout: Duration,
    #[serde(default)]
    pub icmp_settings: IcmpSettings,
    #[serde(default)]
    pub tcp_settings: TcpSettings,
    #[serde(default)]
    pub high_perf_icmp: bool,
    #[serde(default)]
    pub icmp_rate_limit: u32,

    /// Identifiers stamped onto generated targets and `DeviceUpdate`s;
    /// absent from the illustrative wire schema in spec.md §6 but named as
    /// part of the config model in §3 ("agent/poller/partition
    /// identifiers"). Tolerantly defaulted to empty strings like every other
    /// absent field.
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub poller_id: String,
    #[serde(default)]
    pub partition: String,
}

impl Config {
    /// Decodes a wire-format blob per §4.1's decoder contract.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Applies the preserve-on-zero merge rule (§4.1): for each field in
    /// `new`, a zero value or empty sequence leaves the existing value
    /// untouched; anything else replaces it. This is what makes
    /// `UpdateConfig` safe to call with a partial control-plane write that
    /// only knows about e.g. `networks`.
    pub fn merge_from(&mut self, new: Config) {
        merge_vec(&mut self.networks, new.networks);
        merge_vec(&mut self.device_targets, new.device_targets);
        merge_vec(&mut self.ports, new.ports);
        merge_vec(&mut self.sweep_modes, new.sweep_modes);
        merge_duration(&mut self.interval, new.interval);
        merge_num(&mut self.concurrency, new.concurrency);
        merge_duration(&mut self.timeout, new.timeout);
        merge_num(&mut self.icmp_count, new.icmp_count);
        merge_num(&mut self.max_idle, new.max_idle);
        merge_duration(&mut self.max_lifetime, new.max_lifetime);
        merge_duration(&mut self.idle_timeout, new.idle_timeout);
        merge_icmp_settings(&mut self.icmp_settings, new.icmp_settings);
        merge_tcp_settings(&mut self.tcp_settings, new.tcp_settings);
        if new.high_perf_icmp {
            self.high_perf_icmp = true;
        }
        merge_num(&mut self.icmp_rate_limit, new.icmp_rate_limit);
        merge_str(&mut self.agent_id, new.agent_id);
        merge_str(&mut self.poller_id, new.poller_id);
        merge_str(&mut self.partition, new.partition);
    }

    /// Resolves the `sweep_modes` to use for a device-target entry: the
    /// entry's own list if non-empty, otherwise the global list.
    pub fn resolve_sweep_modes(&self, entry: &DeviceTargetConfig) -> Vec<String> {
        if entry.sweep_modes.is_empty() {
            self.sweep_modes.clone()
        } else {
            entry.sweep_modes.clone()
        }
    }
}

fn merge_vec<T>(existing: &mut Vec<T>, new: Vec<T>) {
    if !new.is_empty() {
        *existing = new;
    }
}

fn merge_num<T: PartialEq + Default>(existing: &mut T, new: T) {
    if new != T::default() {
        *existing = new;
    }
}

fn merge_str(existing: &mut String, new: String) {
    if !new.is_empty() {
        *existing = new;
    }
}

fn merge_duration(existing: &mut Duration, new: Duration) {
    if !new.is_zero() {
        *existing = new;
    }
}

fn merge_icmp_settings(existing: &mut IcmpSettings, new: IcmpSettings) {
    merge_num(&mut existing.rate_limit, new.rate_limit);
    merge_duration(&mut existing.timeout, new.timeout);
    merge_num(&mut existing.max_batch, new.max_batch);
}

fn merge_tcp_settings(existing: &mut TcpSettings, new: TcpSettings) {
    merge_num(&mut existing.concurrency, new.concurrency);
    merge_duration(&mut existing.timeout, new.timeout);
    merge_num(&mut existing.max_batch, new.max_batch);
    merge_str(&mut existing.route_discovery_host, new.route_discovery_host);
    merge_num(&mut existing.ring_block_size, new.ring_block_size);
    merge_num(&mut existing.ring_block_count, new.ring_block_count);
    merge_str(&mut existing.interface, new.interface);
    if new.suppress_rst_reply {
        existing.suppress_rst_reply = true;
    }
}
