// Device Inspector
//
// - enumeration.rs: lsblk snapshot of every block device
// - detection.rs: per-device classification by signal precedence

pub mod detection;
pub mod enumeration;


pub use detection::{
    device_backs, parent_disk, ClassificationTier, Confidence, DeviceClassification,
    DeviceInspector, FeatureReport, ProbeFailure, ProbeOutcome,
};
pub use enumeration::{list_block_devices, parse_lsblk_json, BlockDevice};
