// Strategy engine
//
// - mod.rs: per-kind method chains and the result record
// - executor.rs: runs a chain through the process controller

pub mod executor;


pub use executor::StrategyExecutor;

use crate::drives::DeviceClassification;
use crate::{DeviceKind, TargetMode, WipeTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Erasure method, identified by a stable label in results and certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WipeMethod {
    #[serde(rename = "nvme-format-secure")]
    NvmeFormatSecure,
    #[serde(rename = "ata-secure-erase")]
    AtaSecureErase,
    #[serde(rename = "blkdiscard-fallback")]
    BlkdiscardFallback,
    #[serde(rename = "zero-fill")]
    ZeroFill,
    #[serde(rename = "sfill-free-space")]
    SfillFreeSpace,
}

impl WipeMethod {
    pub fn label(&self) -> &'static str {
        match self {
            WipeMethod::NvmeFormatSecure => "nvme-format-secure",
            WipeMethod::AtaSecureErase => "ata-secure-erase",
            WipeMethod::BlkdiscardFallback => "blkdiscard-fallback",
            WipeMethod::ZeroFill => "zero-fill",
            WipeMethod::SfillFreeSpace => "sfill-free-space",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            WipeMethod::NvmeFormatSecure,
            WipeMethod::AtaSecureErase,
            WipeMethod::BlkdiscardFallback,
            WipeMethod::ZeroFill,
            WipeMethod::SfillFreeSpace,
        ]
        .into_iter()
        .find(|m| m.label() == label)
    }

    pub fn is_discard(&self) -> bool {
        matches!(self, WipeMethod::BlkdiscardFallback)
    }
}

impl fmt::Display for WipeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What happens when a candidate fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTrigger {
    Terminal,
    NextIfDiscardSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub method: WipeMethod,
    pub on_failure: FallbackTrigger,
}

impl Candidate {
    const fn terminal(method: WipeMethod) -> Self {
        Self {
            method,
            on_failure: FallbackTrigger::Terminal,
        }
    }
}

/// Ordered candidate methods for a device kind.
pub fn select_method(kind: DeviceKind) -> Vec<Candidate> {
    match kind {
        DeviceKind::Nvme => vec![Candidate::terminal(WipeMethod::NvmeFormatSecure)],
        DeviceKind::SataSsd => vec![
            Candidate {
                method: WipeMethod::AtaSecureErase,
                on_failure: FallbackTrigger::NextIfDiscardSupported,
            },
            Candidate::terminal(WipeMethod::BlkdiscardFallback),
        ],
        DeviceKind::Hdd | DeviceKind::Unknown => vec![Candidate::terminal(WipeMethod::ZeroFill)],
    }
}

/// Plan for one erasure run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeStrategy {
    pub target: WipeTarget,
    pub kind: Option<DeviceKind>,
    pub candidates: Vec<Candidate>,
    pub passes: u32,
    /// Byte count for overwrite methods, when known
    pub size: Option<u64>,
}

impl WipeStrategy {
    /// Partitions reuse their disk's chain against the partition path; free
    /// space is never classified.
    pub fn plan(
        target: WipeTarget,
        classification: Option<&DeviceClassification>,
        passes: u32,
    ) -> Self {
        let passes = passes.max(1);
        match target.mode() {
            TargetMode::FreeSpace => Self {
                target,
                kind: None,
                candidates: vec![Candidate::terminal(WipeMethod::SfillFreeSpace)],
                passes: 1,
                size: None,
            },
            TargetMode::Device | TargetMode::Partition => {
                let kind = classification.map_or(DeviceKind::Unknown, |c| c.kind);
                Self {
                    target,
                    kind: Some(kind),
                    candidates: select_method(kind),
                    passes,
                    size: classification.and_then(|c| c.size),
                }
            }
        }
    }

    pub fn primary(&self) -> Option<WipeMethod> {
        self.candidates.first().map(|c| c.method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeStatus {
    Success,
    /// Some overwrite passes completed before a later pass failed
    Partial,
    Failed,
    Cancelled,
    DryRun,
}

impl fmt::Display for WipeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WipeStatus::Success => "success",
            WipeStatus::Partial => "partial",
            WipeStatus::Failed => "failed",
            WipeStatus::Cancelled => "cancelled",
            WipeStatus::DryRun => "dry_run",
        })
    }
}

/// Everything one erasure run did, consumed once by the certificate builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WipeResult {
    pub device: String,
    pub kind: Option<DeviceKind>,
    pub target_mode: TargetMode,
    pub method: Option<WipeMethod>,
    pub methods_attempted: Vec<WipeMethod>,
    pub passes_requested: u32,
    pub passes_executed: u32,
    pub failing_pass: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub output: Vec<String>,
    /// Redacted command lines in execution order
    pub invocations: Vec<String>,
    /// Read-only helper commands run while preparing the run
    #[serde(default)]
    pub probe_invocations: Vec<String>,
    pub notes: Vec<String>,
    pub status: WipeStatus,
}

impl WipeResult {
    pub fn duration(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drives::{ClassificationTier, Confidence};
    use test_case::test_case;

    fn classification(kind: DeviceKind) -> DeviceClassification {
        DeviceClassification {
            path: "/dev/sdx".to_string(),
            kind,
            model: None,
            serial: None,
            rotational: None,
            size: Some(4096),
            discard_supported: None,
            secure_erase_supported: None,
            tier: ClassificationTier::QueueRotational,
            confidence: Confidence::Confirmed,
            probe_failures: Vec::new(),
        }
    }

    #[test_case(DeviceKind::Nvme, &["nvme-format-secure"] ; "nvme")]
    #[test_case(DeviceKind::SataSsd, &["ata-secure-erase", "blkdiscard-fallback"] ; "sata ssd")]
    #[test_case(DeviceKind::Hdd, &["zero-fill"] ; "hdd")]
    #[test_case(DeviceKind::Unknown, &["zero-fill"] ; "unknown")]
    fn test_select_method_chain(kind: DeviceKind, expected: &[&str]) {
        let labels: Vec<_> = select_method(kind).iter().map(|c| c.method.label()).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_only_ata_erase_falls_back() {
        let chain = select_method(DeviceKind::SataSsd);
        assert_eq!(chain[0].on_failure, FallbackTrigger::NextIfDiscardSupported);
        assert_eq!(chain[1].on_failure, FallbackTrigger::Terminal);
        assert_eq!(
            select_method(DeviceKind::Nvme)[0].on_failure,
            FallbackTrigger::Terminal
        );
    }

    #[test]
    fn test_labels_round_trip_through_serde() {
        for method in [
            WipeMethod::NvmeFormatSecure,
            WipeMethod::AtaSecureErase,
            WipeMethod::BlkdiscardFallback,
            WipeMethod::ZeroFill,
            WipeMethod::SfillFreeSpace,
        ] {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.label()));
            assert_eq!(WipeMethod::from_label(method.label()), Some(method));
        }
    }

    #[test]
    fn test_partition_plan_uses_disk_strategy() {
        let target = WipeTarget::Partition("/dev/sdx2".to_string());
        let plan = WipeStrategy::plan(target, Some(&classification(DeviceKind::SataSsd)), 3);
        assert_eq!(plan.primary(), Some(WipeMethod::AtaSecureErase));
        assert_eq!(plan.kind, Some(DeviceKind::SataSsd));
        assert_eq!(plan.passes, 3);
    }

    #[test]
    fn test_free_space_plan_skips_classification() {
        let plan = WipeStrategy::plan(WipeTarget::FreeSpace("/mnt/data".to_string()), None, 4);
        assert_eq!(plan.kind, None);
        assert_eq!(plan.primary(), Some(WipeMethod::SfillFreeSpace));
        assert_eq!(plan.passes, 1);
    }

    #[test]
    fn test_unclassified_device_falls_back_to_overwrite() {
        let plan = WipeStrategy::plan(WipeTarget::Device("/dev/sdx".to_string()), None, 0);
        assert_eq!(plan.primary(), Some(WipeMethod::ZeroFill));
        assert_eq!(plan.passes, 1);
    }
}
