use super::enumeration::{list_block_devices, lsblk_command, BlockDevice};
use crate::tools::{InvocationLog, PrivilegeToken, ToolCommand, ToolOutput, ToolRunner};
use crate::{DeviceKind, EraseError, EraseResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref NVME_NAME: Regex =
        Regex::new(r"^nvme\d+n\d+(p\d+)?$").expect("Invalid NVMe name pattern");
    static ref P_SUFFIXED_PARTITION: Regex =
        Regex::new(r"^((?:nvme\d+n\d+)|(?:mmcblk\d+)|(?:loop\d+)|(?:md\d+))p\d+$")
            .expect("Invalid partition pattern");
    static ref PLAIN_PARTITION: Regex =
        Regex::new(r"^((?:s|h|v|xv)d[a-z]+)\d+$").expect("Invalid partition pattern");
}

const PROC_MOUNTS: &str = "/proc/mounts";

/// Result of one non-destructive probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome<T> {
    Found(T),
    /// The probe ran but the device does not expose this information
    Absent,
    Failed(String),
}

impl<T> ProbeOutcome<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            ProbeOutcome::Found(v) => Some(v),
            _ => None,
        }
    }

    fn failure(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Which signal settled the device kind, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationTier {
    NamePattern,
    QueueRotational,
    FeatureProbe,
    EnumerationTable,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Confirmed,
    Inferred,
    Guessed,
}

impl From<ClassificationTier> for Confidence {
    fn from(tier: ClassificationTier) -> Self {
        match tier {
            ClassificationTier::NamePattern | ClassificationTier::QueueRotational => {
                Confidence::Confirmed
            }
            ClassificationTier::FeatureProbe | ClassificationTier::EnumerationTable => {
                Confidence::Inferred
            }
            ClassificationTier::Fallback => Confidence::Guessed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub probe: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClassification {
    pub path: String,
    pub kind: DeviceKind,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub rotational: Option<bool>,
    pub size: Option<u64>,
    pub discard_supported: Option<bool>,
    pub secure_erase_supported: Option<bool>,
    pub tier: ClassificationTier,
    pub confidence: Confidence,
    pub probe_failures: Vec<ProbeFailure>,
}

impl DeviceClassification {
    /// Non-fatal warning carried when no signal could settle the kind
    pub fn uncertainty(&self) -> Option<EraseError> {
        if self.kind != DeviceKind::Unknown {
            return None;
        }
        let reason = if self.probe_failures.is_empty() {
            "no probe reported the media type".to_string()
        } else {
            self.probe_failures
                .iter()
                .map(|f| format!("{}: {}", f.probe, f.reason))
                .collect::<Vec<_>>()
                .join("; ")
        };
        Some(EraseError::ClassificationUncertain {
            path: self.path.clone(),
            reason,
        })
    }
}

/// Facts parsed from `hdparm -I`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureReport {
    pub solid_state: Option<bool>,
    pub secure_erase: bool,
    pub frozen: bool,
    pub trim: bool,
    pub model: Option<String>,
    pub serial: Option<String>,
}

impl FeatureReport {
    pub(crate) fn parse(output: &str) -> Self {
        let mut report = FeatureReport {
            model: extract_field(output, "Model Number:"),
            serial: extract_field(output, "Serial Number:"),
            ..Default::default()
        };

        if let Some(rate) = extract_field(output, "Nominal Media Rotation Rate:") {
            report.solid_state = if rate.contains("Solid State") {
                Some(true)
            } else if rate.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                Some(false)
            } else {
                None
            };
        }

        report.trim = output
            .lines()
            .any(|line| line.contains("Data Set Management TRIM supported"));

        let mut in_security = false;
        for line in output.lines() {
            if !line.starts_with(char::is_whitespace) {
                in_security = line.starts_with("Security:");
                continue;
            }
            if !in_security {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["supported"] => report.secure_erase = true,
                ["frozen"] => report.frozen = true,
                _ => {}
            }
        }

        report
    }
}

/// Value after `field_name` on the first line that carries it
pub(crate) fn extract_field(output: &str, field_name: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.split_once(field_name).map(|(_, rest)| rest.trim()))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Kernel name of the whole disk holding `name` (identity for whole disks)
pub fn parent_disk(name: &str) -> String {
    if let Some(caps) = P_SUFFIXED_PARTITION.captures(name) {
        return caps[1].to_string();
    }
    if let Some(caps) = PLAIN_PARTITION.captures(name) {
        return caps[1].to_string();
    }
    name.to_string()
}

/// Whether wiping `target` would destroy the device backing `root_source`
pub fn device_backs(target: &str, root_source: &str) -> bool {
    let target_name = kernel_name(target);
    let root_name = kernel_name(root_source);
    target_name == root_name || parent_disk(&root_name) == target_name
}

fn kernel_name(path: &str) -> String {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Settle the device kind from the available signals by strict precedence.
pub(crate) fn resolve_kind(
    name: &str,
    queue_rotational: &ProbeOutcome<bool>,
    features: &ProbeOutcome<FeatureReport>,
    table_rotational: Option<bool>,
) -> (DeviceKind, ClassificationTier) {
    if NVME_NAME.is_match(name) {
        return (DeviceKind::Nvme, ClassificationTier::NamePattern);
    }

    let solid_state = features.found().and_then(|f| f.solid_state);

    match (queue_rotational.found().copied(), solid_state) {
        (Some(false), _) => return (DeviceKind::SataSsd, ClassificationTier::QueueRotational),
        // USB bridges commonly report SSDs as rotational
        (Some(true), Some(true)) => return (DeviceKind::SataSsd, ClassificationTier::FeatureProbe),
        (Some(true), _) => return (DeviceKind::Hdd, ClassificationTier::QueueRotational),
        (None, Some(true)) => return (DeviceKind::SataSsd, ClassificationTier::FeatureProbe),
        (None, Some(false)) => return (DeviceKind::Hdd, ClassificationTier::FeatureProbe),
        (None, None) => {}
    }

    match table_rotational {
        Some(false) => (DeviceKind::SataSsd, ClassificationTier::EnumerationTable),
        Some(true) => (DeviceKind::Hdd, ClassificationTier::EnumerationTable),
        None => (DeviceKind::Unknown, ClassificationTier::Fallback),
    }
}

/// Classifies block devices without modifying them.
pub struct DeviceInspector {
    runner: Arc<dyn ToolRunner>,
    sysfs_root: PathBuf,
    privilege: Option<PrivilegeToken>,
    log: InvocationLog,
}

impl DeviceInspector {
    pub fn new(runner: Arc<dyn ToolRunner>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            sysfs_root: sysfs_root.into(),
            privilege: None,
            log: InvocationLog::new(),
        }
    }

    /// Record every helper command line into `log`.
    pub fn with_log(mut self, log: InvocationLog) -> Self {
        self.log = log;
        self
    }

    /// Helper commands run so far, redacted
    pub fn invocations(&self) -> Vec<String> {
        self.log.entries()
    }

    pub fn with_privilege(mut self, privilege: Option<PrivilegeToken>) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn enumerate(&self) -> EraseResult<Vec<BlockDevice>> {
        self.log.record(&lsblk_command());
        list_block_devices(self.runner.as_ref(), self.privilege.as_ref())
    }

    /// Classify `path`. Never fails: probe errors degrade the result and are
    /// recorded in `probe_failures`.
    pub fn inspect(&self, path: &str) -> DeviceClassification {
        let name = kernel_name(path);
        let disk = self.queue_owner(&name);
        let nvme = NVME_NAME.is_match(&name);

        let table = self.probe_table(path, &name);
        let queue = self.probe_queue_rotational(&disk);
        let features = if nvme {
            ProbeOutcome::Absent
        } else {
            self.probe_features(path)
        };
        let identity = self.probe_identity(path);
        let discard = self.probe_discard(&disk);

        let mut failures = Vec::new();
        for (probe, failure) in [
            ("lsblk", table.failure()),
            ("queue/rotational", queue.failure()),
            ("hdparm", features.failure()),
            ("smartctl", identity.failure()),
            ("queue/discard_max_bytes", discard.failure()),
        ] {
            if let Some(reason) = failure {
                failures.push(ProbeFailure {
                    probe: probe.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        let row = table.found();
        let feature_report = features.found();
        let (kind, tier) = resolve_kind(&name, &queue, &features, row.and_then(|r| r.rotational));

        let (smart_model, smart_serial) = identity.found().cloned().unwrap_or((None, None));
        let model = smart_model
            .or_else(|| feature_report.and_then(|f| f.model.clone()))
            .or_else(|| row.and_then(|r| r.model.clone()));
        let serial = smart_serial
            .or_else(|| feature_report.and_then(|f| f.serial.clone()))
            .or_else(|| row.and_then(|r| r.serial.clone()));

        let rotational = queue
            .found()
            .copied()
            .or_else(|| feature_report.and_then(|f| f.solid_state.map(|ss| !ss)))
            .or_else(|| row.and_then(|r| r.rotational));

        let discard_supported = discard
            .found()
            .copied()
            .or_else(|| feature_report.filter(|f| f.trim).map(|_| true));

        let secure_erase_supported = feature_report.map(|f| f.secure_erase && !f.frozen);

        let size = self.read_size(&name).or_else(|| row.map(|r| r.size));

        let classification = DeviceClassification {
            path: path.to_string(),
            kind,
            model,
            serial,
            rotational,
            size,
            discard_supported,
            secure_erase_supported,
            tier,
            confidence: tier.into(),
            probe_failures: failures,
        };

        match classification.uncertainty() {
            Some(warning) => tracing::warn!(device = %path, "{}", warning),
            None => tracing::info!(
                device = %path,
                kind = %classification.kind,
                tier = ?classification.tier,
                "Device classified"
            ),
        }

        classification
    }

    /// Source device mounted at `/`, via findmnt or /proc/mounts.
    pub fn root_device(&self) -> Option<String> {
        let findmnt = ToolCommand::new("findmnt", "findmnt").args(["-n", "-o", "SOURCE", "/"]);
        if let Ok(output) = self.run(&findmnt, None) {
            if output.success() {
                if let Some(source) = clean_mount_source(output.stdout.trim()) {
                    return Some(source);
                }
            }
        }

        fs::read_to_string(PROC_MOUNTS)
            .ok()
            .and_then(|mounts| root_from_mounts(&mounts))
    }

    fn run(&self, cmd: &ToolCommand, privilege: Option<&PrivilegeToken>) -> EraseResult<ToolOutput> {
        self.log.record(cmd);
        self.runner.execute(cmd, privilege)
    }

    fn queue_owner(&self, name: &str) -> String {
        if self.block_dir(name).join("queue").exists() {
            name.to_string()
        } else {
            parent_disk(name)
        }
    }

    fn block_dir(&self, name: &str) -> PathBuf {
        self.sysfs_root.join("class").join("block").join(name)
    }

    fn read_sysfs(&self, path: &Path) -> ProbeOutcome<String> {
        match fs::read_to_string(path) {
            Ok(raw) => ProbeOutcome::Found(raw.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProbeOutcome::Absent,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }

    fn probe_queue_rotational(&self, disk: &str) -> ProbeOutcome<bool> {
        let path = self.block_dir(disk).join("queue").join("rotational");
        match self.read_sysfs(&path) {
            ProbeOutcome::Found(v) => match v.as_str() {
                "0" => ProbeOutcome::Found(false),
                "1" => ProbeOutcome::Found(true),
                other => ProbeOutcome::Failed(format!("unexpected rotational value {:?}", other)),
            },
            ProbeOutcome::Absent => ProbeOutcome::Absent,
            ProbeOutcome::Failed(e) => ProbeOutcome::Failed(e),
        }
    }

    fn probe_discard(&self, disk: &str) -> ProbeOutcome<bool> {
        let path = self.block_dir(disk).join("queue").join("discard_max_bytes");
        match self.read_sysfs(&path) {
            ProbeOutcome::Found(v) => match v.parse::<u64>() {
                Ok(bytes) => ProbeOutcome::Found(bytes > 0),
                Err(e) => ProbeOutcome::Failed(e.to_string()),
            },
            ProbeOutcome::Absent => ProbeOutcome::Absent,
            ProbeOutcome::Failed(e) => ProbeOutcome::Failed(e),
        }
    }

    fn read_size(&self, name: &str) -> Option<u64> {
        // sysfs reports 512-byte sectors regardless of the logical block size
        self.read_sysfs(&self.block_dir(name).join("size"))
            .found()
            .and_then(|v| v.parse::<u64>().ok())
            .and_then(|sectors| sectors.checked_mul(512))
    }

    fn probe_table(&self, path: &str, name: &str) -> ProbeOutcome<BlockDevice> {
        match self.enumerate() {
            Ok(devices) => devices
                .into_iter()
                .find(|d| d.path == path || d.name == name)
                .map_or(ProbeOutcome::Absent, ProbeOutcome::Found),
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }

    fn probe_features(&self, path: &str) -> ProbeOutcome<FeatureReport> {
        let cmd = ToolCommand::new("hdparm-identify", "hdparm").args(["-I", path]);
        match self.run(&cmd, self.privilege.as_ref()) {
            Ok(output) if output.success() => ProbeOutcome::Found(FeatureReport::parse(&output.stdout)),
            Ok(output) => ProbeOutcome::Failed(format!(
                "exit {}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }

    fn probe_identity(&self, path: &str) -> ProbeOutcome<(Option<String>, Option<String>)> {
        let cmd = ToolCommand::new("smartctl-info", "smartctl").args(["-i", path]);
        match self.run(&cmd, self.privilege.as_ref()) {
            // Bits 0 and 1 of smartctl's exit status mean the device was never read
            Ok(output) if output.exit_code & 0b11 == 0 => {
                let model = extract_field(&output.stdout, "Device Model:")
                    .or_else(|| extract_field(&output.stdout, "Model Number:"));
                let serial = extract_field(&output.stdout, "Serial Number:");
                if model.is_none() && serial.is_none() {
                    ProbeOutcome::Absent
                } else {
                    ProbeOutcome::Found((model, serial))
                }
            }
            Ok(output) => ProbeOutcome::Failed(format!("exit {}", output.exit_code)),
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }
}

/// Strip btrfs subvolume suffixes such as `/dev/sda2[/@]`
fn clean_mount_source(source: &str) -> Option<String> {
    let source = source.split('[').next().unwrap_or(source).trim();
    if source.is_empty() {
        None
    } else {
        Some(source.to_string())
    }
}

pub(crate) fn root_from_mounts(mounts: &str) -> Option<String> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            (target == "/" && source.starts_with("/dev/")).then(|| source.to_string())
        })
        .last()
}
