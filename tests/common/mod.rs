//! Shared fixtures for integration tests
//!
//! Drives are plain files filled with a pattern; a fake sysfs tree under the
//! same temp dir describes them to the inspector as rotational disks.
#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wipe_attest::config::Settings;
use wipe_attest::crypto::{Certificate, CertificateBuilder, Signer};
use wipe_attest::strategy::{WipeMethod, WipeResult, WipeStatus};
use wipe_attest::tools::{SystemRunner, ToolRunner};
use wipe_attest::{DeviceKind, TargetMode};

pub const SECTOR: u64 = 512;

/// File-backed stand-in for a block device
pub struct FakeDrive {
    pub path: PathBuf,
    pub size: u64,
}

impl FakeDrive {
    /// Create `<dir>/<name>` of `size` bytes filled with `fill`, and register it
    /// under `<dir>/sys` as a rotational disk of the same size.
    pub fn create(dir: &Path, name: &str, size: u64, fill: u8) -> Self {
        assert_eq!(size % SECTOR, 0, "fake drives are whole sectors");
        let path = dir.join(name);
        fs::write(&path, vec![fill; size as usize]).unwrap();

        let block = sysfs_root(dir).join("class/block").join(name);
        fs::create_dir_all(block.join("queue")).unwrap();
        fs::write(block.join("queue/rotational"), "1\n").unwrap();
        fs::write(block.join("queue/discard_max_bytes"), "0\n").unwrap();
        fs::write(block.join("size"), format!("{}\n", size / SECTOR)).unwrap();

        Self { path, size }
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().unwrap()
    }
}

pub fn sysfs_root(dir: &Path) -> PathBuf {
    dir.join("sys")
}

/// Settings confined to `dir`
pub fn settings_in(dir: &Path) -> Settings {
    Settings {
        certificate_dir: dir.join("certs"),
        key_dir: dir.join("keys"),
        log_dir: dir.join("logs"),
        operator: "integration".to_string(),
        sysfs_root: sysfs_root(dir),
        cancel_grace_secs: 2,
        ..Settings::default()
    }
}

pub fn signer_in(dir: &Path) -> Arc<Signer> {
    Arc::new(Signer::load_or_create(&dir.join("keys")).unwrap())
}

pub fn system_runner() -> Arc<dyn ToolRunner> {
    Arc::new(SystemRunner::new())
}

/// A finished HDD zero-fill record, for tests that only need a certificate
pub fn sample_certificate(device: &str) -> Certificate {
    let finished = chrono::Utc::now();
    let result = WipeResult {
        device: device.to_string(),
        kind: Some(DeviceKind::Hdd),
        target_mode: TargetMode::Device,
        method: Some(WipeMethod::ZeroFill),
        methods_attempted: vec![WipeMethod::ZeroFill],
        passes_requested: 2,
        passes_executed: 2,
        failing_pass: None,
        started_at: finished - chrono::Duration::seconds(42),
        finished_at: finished,
        exit_code: Some(0),
        output: vec!["4194304 bytes (4.2 MB, 4.0 MiB) copied, 0.01 s, 420 MB/s".to_string()],
        invocations: vec![format!("dd if=/dev/zero of={} bs=1M conv=fsync status=progress", device)],
        probe_invocations: vec![format!("hdparm -I {}", device)],
        notes: Vec::new(),
        status: WipeStatus::Success,
    };
    CertificateBuilder::new("integration").build(None, &result, &result.methods_attempted)
}

/// Verify that a file contains only zeros
pub fn verify_all_zeros(path: &Path) -> std::io::Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut buffer = vec![0u8; 4096];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(true);
        }
        if buffer[..bytes_read].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }
}
