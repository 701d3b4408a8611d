use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use sweep_core::{
    DeviceUpdate,
    ProbeResult,
    Target,
};

use crate::aggregator::{
    CycleIdentity,
    DeviceAggregator,
};
use crate::key::{
    all_ips,
    device_key,
    primary_ip,
};

/// Holds one `DeviceAggregator` per logical device for the duration of a
/// sweep cycle. Built by walking the cycle's generated targets (§4.5 step
/// 4): any two targets whose `device_key` matches join the same aggregator,
/// whose `ips` is the union of their addresses in first-seen order.
pub struct DeviceAggregatorSet {
    aggregators: DashMap<String, Arc<DeviceAggregator>>,
    identity: CycleIdentity,
}

impl DeviceAggregatorSet {
    pub fn new(identity: CycleIdentity) -> Self {
        Self {
            aggregators: DashMap::new(),
            identity,
        }
    }

    /// Registers `target` with its device's aggregator, creating one on
    /// first sight of that device key. A later target sharing the same key
    /// merges its addresses into the existing aggregator's `ips`.
    pub fn prepare_target(&self, target: &Target, source: &str, query_label: &str) {
        let key = device_key(target);
        match self.aggregators.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().merge_ips(&all_ips(target)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(DeviceAggregator::new(
                    key,
                    all_ips(target),
                    primary_ip(target),
                    source.to_string(),
                    query_label.to_string(),
                )));
            }
        }
    }

    /// Appends `r` to the aggregator matching its target's device key, if
    /// one was prepared for this cycle. Probes for devices outside the
    /// current target set (should not happen in practice) are logged and
    /// dropped.
    pub fn record(&self, r: ProbeResult) {
        let key = device_key(&r.target);
        match self.aggregators.get(&key) {
            Some(agg) => agg.record(r),
            None => debug!("no device aggregator prepared for key '{key}' (host {})", r.target.host),
        }
    }

    pub fn len(&self) -> usize {
        self.aggregators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }

    /// The addresses currently unioned under `device_key`, if an aggregator
    /// was prepared for it.
    pub fn ips(&self, device_key: &str) -> Option<Vec<String>> {
        self.aggregators.get(device_key).map(|agg| agg.ips())
    }

    /// Finalizes every aggregator, producing one `DeviceUpdate` per device
    /// (§4.5 step 7). Consumes `self`: aggregators do not outlive the cycle
    /// that created them.
    pub fn finalize_all(self) -> Vec<DeviceUpdate> {
        self.aggregators
            .into_iter()
            .map(|(_, agg)| agg.finalize(&self.identity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use sweep_core::SweepMode;

    use super::*;

    fn identity() -> CycleIdentity {
        CycleIdentity {
            agent_id: "agent".into(),
            poller_id: "poller".into(),
            partition: "default".into(),
        }
    }

    fn target_for_device(host: &str, device_id: &str) -> Target {
        let mut t = Target::new(host, 0, SweepMode::Icmp);
        t.metadata.insert("armis_device_id".into(), json!(device_id));
        t.metadata.insert("all_ips".into(), json!([host]));
        t
    }

    #[test]
    fn two_targets_sharing_a_device_key_join_one_aggregator() {
        let set = DeviceAggregatorSet::new(identity());
        let t1 = target_for_device("10.0.0.1", "dev-1");
        let t2 = target_for_device("10.0.0.2", "dev-1");
        set.prepare_target(&t1, "armis", "label");
        set.prepare_target(&t2, "armis", "label");
        assert_eq!(set.len(), 1);

        set.record(ProbeResult::new(t1.clone(), true, Duration::from_millis(1), 0.0));
        set.record(ProbeResult::new(t2.clone(), false, Duration::from_millis(1), 0.0));

        let updates = set.finalize_all();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_available);
    }

    #[test]
    fn second_target_sharing_a_device_key_merges_into_ips() {
        let set = DeviceAggregatorSet::new(identity());
        let t1 = target_for_device("10.0.0.1", "dev-1");
        let t2 = target_for_device("10.0.0.2", "dev-1");
        set.prepare_target(&t1, "armis", "label");
        set.prepare_target(&t2, "armis", "label");

        assert_eq!(set.ips("dev-1").unwrap(), vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }
}
