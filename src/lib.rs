pub mod config;
pub mod crypto;
pub mod drives;
pub mod error;
pub mod process;
pub mod strategy;
pub mod tools;
pub mod ui;
pub mod wipe_orchestrator;

pub use error::{EraseError, EraseResult};
pub use wipe_orchestrator::{Orchestrator, WipeOutcome, WipePlan};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage medium family; drives the erasure strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Nvme,
    SataSsd,
    Hdd,
    Unknown,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Nvme => "nvme",
            DeviceKind::SataSsd => "sata_ssd",
            DeviceKind::Hdd => "hdd",
            DeviceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an erasure run is aimed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum WipeTarget {
    Device(String),
    Partition(String),
    /// Mountpoint whose unallocated space is scrubbed
    FreeSpace(String),
}

impl WipeTarget {
    pub fn path(&self) -> &str {
        match self {
            WipeTarget::Device(p) | WipeTarget::Partition(p) | WipeTarget::FreeSpace(p) => p,
        }
    }

    pub fn mode(&self) -> TargetMode {
        match self {
            WipeTarget::Device(_) => TargetMode::Device,
            WipeTarget::Partition(_) => TargetMode::Partition,
            WipeTarget::FreeSpace(_) => TargetMode::FreeSpace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    Device,
    Partition,
    FreeSpace,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetMode::Device => "device",
            TargetMode::Partition => "partition",
            TargetMode::FreeSpace => "free_space",
        })
    }
}

#[cfg(test)]
mod lib_tests;
