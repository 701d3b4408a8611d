//! Device availability aggregator (§4.4): groups the many per-address,
//! per-protocol probes belonging to one logical device into a single
//! availability verdict plus a metadata envelope.

pub mod aggregator;
pub mod key;
pub mod registry;

pub use aggregator::{
    CycleIdentity,
    DeviceAggregator,
};
pub use key::{
    all_ips,
    device_key,
    primary_ip,
};
pub use registry::DeviceAggregatorSet;
