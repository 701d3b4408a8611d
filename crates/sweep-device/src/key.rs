use sweep_core::Target;

/// The metadata key a target carries its source-system device id under
/// (e.g. an Armis device id). Preferred over every other identity source
/// (§4.4, §9 "Device grouping ambiguity").
const SOURCE_DEVICE_ID_KEY: &str = "armis_device_id";
const PRIMARY_IP_KEY: &str = "primary_ip";
/// Ordered list of every address a device is known by, used to associate
/// probes against any of those addresses with the same aggregator.
const ALL_IPS_KEY: &str = "all_ips";

/// Derives the device key for a target: prefer a source-system device id,
/// then the declared primary IP, then the target's own address. This
/// priority must not be silently reordered or partially synthesized — see
/// the open question in §9, resolved in DESIGN.md.
pub fn device_key(target: &Target) -> String {
    if let Some(id) = target.metadata_str(SOURCE_DEVICE_ID_KEY) {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    if let Some(ip) = target.metadata_str(PRIMARY_IP_KEY) {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    target.host.clone()
}

/// The device's declared primary IP, falling back to the target's own
/// address when metadata carries none.
pub fn primary_ip(target: &Target) -> String {
    target
        .metadata_str(PRIMARY_IP_KEY)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| target.host.clone())
}

/// All addresses a target's device is known by, in declaration order,
/// falling back to just the target's own address.
pub fn all_ips(target: &Target) -> Vec<String> {
    match target.metadata.get(ALL_IPS_KEY).and_then(|v| v.as_array()) {
        Some(values) => {
            let ips: Vec<String> = values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            if ips.is_empty() {
                vec![target.host.clone()]
            } else {
                ips
            }
        }
        None => vec![target.host.clone()],
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn target_with(metadata: Vec<(&str, serde_json::Value)>) -> Target {
        let mut t = Target::new("10.0.0.1", 0, sweep_core::SweepMode::Icmp);
        for (k, v) in metadata {
            t.metadata.insert(k.to_string(), v);
        }
        t
    }

    #[test]
    fn prefers_source_device_id_over_everything() {
        let t = target_with(vec![
            ("armis_device_id", json!("armis-42")),
            ("primary_ip", json!("10.0.0.9")),
        ]);
        assert_eq!(device_key(&t), "armis-42");
    }

    #[test]
    fn falls_back_to_primary_ip_when_no_source_id() {
        let t = target_with(vec![("primary_ip", json!("10.0.0.9"))]);
        assert_eq!(device_key(&t), "10.0.0.9");
    }

    #[test]
    fn falls_back_to_host_when_metadata_absent() {
        let t = target_with(vec![]);
        assert_eq!(device_key(&t), "10.0.0.1");
    }

    #[test]
    fn all_ips_preserves_declared_order() {
        let t = target_with(vec![("all_ips", json!(["10.0.0.1", "10.0.0.2", "10.0.0.3"]))]);
        assert_eq!(all_ips(&t), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
