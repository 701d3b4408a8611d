use std::str::FromStr;

use ipnetwork::IpNetwork;
use log::warn;
use serde_json::json;
use sweep_core::{
    Config,
    DeviceTargetConfig,
    SweepMode,
    Target,
};

use crate::error::EngineError;

/// Expands a CIDR block to every usable address in it (§4.5
/// `generate_targets`, boundary behavior "CIDR `/32` expands to exactly one
/// address"). `/31` and `/32` blocks have no network/broadcast address to
/// exclude, so every address in the block is usable; wider blocks drop the
/// network and broadcast addresses.
fn expand_cidr(cidr: &str) -> Result<Vec<String>, String> {
    let network = IpNetwork::from_str(cidr).map_err(|e| e.to_string())?;

    let prefix = network.prefix();
    let is_narrow = match network {
        IpNetwork::V4(_) => prefix >= 31,
        IpNetwork::V6(_) => prefix >= 127,
    };

    if is_narrow {
        return Ok(network.iter().map(|ip| ip.to_string()).collect());
    }

    let addresses: Vec<String> = network.iter().map(|ip| ip.to_string()).collect();
    if addresses.len() <= 2 {
        return Ok(addresses);
    }
    Ok(addresses[1..addresses.len() - 1].to_vec())
}

fn parse_sweep_modes(raw: &[String]) -> Vec<SweepMode> {
    raw.iter()
        .filter_map(|s| match s.parse::<SweepMode>() {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!("ignoring unknown sweep mode '{s}': {e}");
                None
            }
        })
        .collect()
}

fn targets_for_address(
    address: &str, modes: &[SweepMode], ports: &[u16], metadata: &[(String, serde_json::Value)],
) -> Vec<Target> {
    let mut out = Vec::new();
    for mode in modes {
        match mode {
            SweepMode::Icmp => {
                let mut t = Target::new(address, 0, SweepMode::Icmp);
                for (k, v) in metadata {
                    t.metadata.insert(k.clone(), v.clone());
                }
                out.push(t);
            }
            SweepMode::Tcp => {
                for &port in ports {
                    let mut t = Target::new(address, port, SweepMode::Tcp);
                    for (k, v) in metadata {
                        t.metadata.insert(k.clone(), v.clone());
                    }
                    out.push(t);
                }
            }
        }
    }
    out
}

fn expand_device_target(cfg: &Config, entry: &DeviceTargetConfig) -> Vec<Target> {
    let addresses = match expand_cidr(&entry.network) {
        Ok(addrs) => addrs,
        Err(reason) => {
            warn!("skipping device target '{}': invalid CIDR: {reason}", entry.network);
            return Vec::new();
        }
    };

    let modes = parse_sweep_modes(&cfg.resolve_sweep_modes(entry));
    let total_hosts = addresses.len() as u64;

    let mut metadata: Vec<(String, serde_json::Value)> = vec![
        ("network".to_string(), json!(entry.network)),
        ("total_hosts".to_string(), json!(total_hosts)),
        ("source".to_string(), json!(entry.source)),
        ("query_label".to_string(), json!(entry.query_label)),
    ];
    for (k, v) in &entry.metadata {
        metadata.push((k.clone(), json!(v)));
    }

    addresses
        .iter()
        .flat_map(|addr| targets_for_address(addr, &modes, &cfg.ports, &metadata))
        .collect()
}

fn expand_legacy_network(cfg: &Config, network: &str) -> Result<Vec<Target>, EngineError> {
    let addresses = expand_cidr(network).map_err(|reason| {
        EngineError::Config(sweep_core::ConfigError::InvalidCidr {
            cidr: network.to_string(),
            reason,
        })
    })?;

    let modes = parse_sweep_modes(&cfg.sweep_modes);
    let metadata = vec![
        ("network".to_string(), json!(network)),
        ("total_hosts".to_string(), json!(addresses.len() as u64)),
        ("source".to_string(), json!("legacy_networks")),
    ];

    Ok(addresses
        .iter()
        .flat_map(|addr| targets_for_address(addr, &modes, &cfg.ports, &metadata))
        .collect())
}

/// Builds the full target list for one cycle (§4.5 `generate_targets`).
///
/// An invalid CIDR among `device_targets` is always logged and the entry
/// skipped. An invalid CIDR among `networks` is a hard error only when
/// `networks` is the sole target source (`device_targets` is empty); when
/// `device_targets` is non-empty the bad entry is logged and skipped instead,
/// matching §7's `ExpansionError` policy.
pub fn generate_targets(cfg: &Config) -> Result<Vec<Target>, EngineError> {
    let mut targets = Vec::new();

    for entry in &cfg.device_targets {
        targets.extend(expand_device_target(cfg, entry));
    }

    for network in &cfg.networks {
        match expand_legacy_network(cfg, network) {
            Ok(expanded) => targets.extend(expanded),
            Err(e) if cfg.device_targets.is_empty() => return Err(e),
            Err(e) => warn!("skipping invalid legacy network '{network}': {e}"),
        }
    }

    if cfg.device_targets.is_empty() && cfg.networks.is_empty() {
        return Err(EngineError::Config(sweep_core::ConfigError::NoTargetSource));
    }

    Ok(targets)
}
