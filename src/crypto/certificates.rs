use super::checklist::{build_checklist, TamperChecklistEntry};
use super::signer::{Signer, Verifier};
use crate::drives::{Confidence, DeviceClassification};
use crate::strategy::{WipeMethod, WipeResult, WipeStatus};
use crate::{DeviceKind, EraseError, EraseResult, TargetMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Lines of tool output kept in a certificate
pub const OUTPUT_TAIL_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateDevice {
    pub path: String,
    pub kind: Option<DeviceKind>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub size_bytes: Option<u64>,
    pub classification_confidence: Option<Confidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateResult {
    pub status: WipeStatus,
    pub exit_code: Option<i32>,
    pub failing_pass: Option<u32>,
    pub summary: String,
}

/// Erasure record. Immutable once persisted: its signature covers the exact
/// bytes written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: String,
    pub created_at: DateTime<Utc>,
    pub device: CertificateDevice,
    pub target_mode: TargetMode,
    pub method: Option<WipeMethod>,
    pub methods_attempted: Vec<WipeMethod>,
    pub passes_requested: u32,
    pub passes_executed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub operator: String,
    pub result: CertificateResult,
    pub dry_run: bool,
    pub tool_invocations: Vec<String>,
    /// Read-only helper commands (enumeration, identification, credential check)
    #[serde(default)]
    pub probe_invocations: Vec<String>,
    pub output_tail: Vec<String>,
    pub checklist: Vec<TamperChecklistEntry>,
    pub notes: Vec<String>,
    pub tool_version: String,
}

pub struct CertificateBuilder {
    operator: String,
}

impl CertificateBuilder {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }

    /// Assemble the record for one finished (or dry) run.
    pub fn build(
        &self,
        device: Option<&DeviceClassification>,
        result: &WipeResult,
        methods_attempted: &[WipeMethod],
    ) -> Certificate {
        let mut notes = Vec::new();
        if let Some(class) = device {
            if let Some(warning) = class.uncertainty() {
                notes.push(warning.to_string());
            }
        }
        if result.target_mode == TargetMode::Partition {
            for method in methods_attempted {
                if matches!(method, WipeMethod::NvmeFormatSecure | WipeMethod::AtaSecureErase) {
                    notes.push(format!(
                        "{} operates on the whole disk containing partition {}",
                        method, result.device
                    ));
                }
            }
        }
        notes.extend(result.notes.iter().cloned());

        let tail_start = result.output.len().saturating_sub(OUTPUT_TAIL_LINES);

        Certificate {
            certificate_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            device: CertificateDevice {
                path: result.device.clone(),
                kind: result.kind,
                model: device.and_then(|d| d.model.clone()),
                serial: device.and_then(|d| d.serial.clone()),
                size_bytes: device.and_then(|d| d.size),
                classification_confidence: device.map(|d| d.confidence),
            },
            target_mode: result.target_mode,
            method: result.method,
            methods_attempted: methods_attempted.to_vec(),
            passes_requested: result.passes_requested,
            passes_executed: result.passes_executed,
            started_at: result.started_at,
            finished_at: result.finished_at,
            operator: self.operator.clone(),
            result: CertificateResult {
                status: result.status,
                exit_code: result.exit_code,
                failing_pass: result.failing_pass,
                summary: summarize(result, methods_attempted),
            },
            dry_run: result.status == WipeStatus::DryRun,
            tool_invocations: result.invocations.clone(),
            probe_invocations: result.probe_invocations.clone(),
            output_tail: result.output[tail_start..].to_vec(),
            checklist: build_checklist(result.kind, methods_attempted),
            notes,
            tool_version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

fn summarize(result: &WipeResult, methods_attempted: &[WipeMethod]) -> String {
    let attempted = if methods_attempted.is_empty() {
        "none".to_string()
    } else {
        methods_attempted
            .iter()
            .map(|m| m.label())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let method = result.method.map_or("none", |m| m.label());

    match result.status {
        WipeStatus::Success => format!("{} completed {} using {}", result.device, method, attempted),
        WipeStatus::Partial => format!(
            "{} partially overwritten: pass {} of {} failed after {} completed",
            result.device,
            result.failing_pass.unwrap_or(0),
            result.passes_requested,
            result.passes_executed
        ),
        WipeStatus::Failed => format!("{} NOT erased; attempted: {}", result.device, attempted),
        WipeStatus::Cancelled => format!("{} erasure cancelled; attempted: {}", result.device, attempted),
        WipeStatus::DryRun => format!("dry run for {}; would use {}; nothing executed", result.device, method),
    }
}

/// Paths of one persisted certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCertificate {
    pub json_path: PathBuf,
    pub sig_path: PathBuf,
    pub report_path: PathBuf,
    /// SHA-256 of the persisted JSON bytes
    pub sha256: String,
}

/// Writes, signs and verifies certificates in one directory.
pub struct CertificateStore {
    dir: PathBuf,
    signer: Arc<Signer>,
}

impl CertificateStore {
    pub fn new(dir: impl Into<PathBuf>, signer: Arc<Signer>) -> Self {
        Self {
            dir: dir.into(),
            signer,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `<id>.json`, its detached signature and the text report.
    pub fn persist(&self, certificate: &Certificate) -> EraseResult<PersistedCertificate> {
        fs::create_dir_all(&self.dir).map_err(|e| EraseError::persistence(&self.dir, e))?;

        let json_path = self.dir.join(format!("{}.json", certificate.certificate_id));
        let bytes = serde_json::to_vec_pretty(certificate)?;
        write_immutable(&json_path, &bytes)?;

        let sig_path = self.sign(&json_path)?;
        let sha256 = format!("{:x}", Sha256::digest(&bytes));

        let report_path = json_path.with_extension("txt");
        let report = crate::ui::render_report(certificate, &sha256, &self.signer.fingerprint());
        write_immutable(&report_path, report.as_bytes())?;

        tracing::info!(
            certificate_id = %certificate.certificate_id,
            json = %json_path.display(),
            sha256 = %sha256,
            "Certificate persisted and signed"
        );

        Ok(PersistedCertificate {
            json_path,
            sig_path,
            report_path,
            sha256,
        })
    }

    /// Sign the exact bytes of `json_path`, writing `<stem>.sig` beside it.
    pub fn sign(&self, json_path: &Path) -> EraseResult<PathBuf> {
        let bytes = fs::read(json_path).map_err(|e| EraseError::persistence(json_path, e))?;
        let signature = self.signer.sign(&bytes)?;
        let sig_path = json_path.with_extension("sig");
        write_immutable(&sig_path, &signature)?;
        Ok(sig_path)
    }

    pub fn load(json_path: &Path) -> EraseResult<Certificate> {
        let bytes = fs::read(json_path).map_err(|e| EraseError::persistence(json_path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn verify(&self, json_path: &Path) -> EraseResult<bool> {
        verify_certificate(json_path, &self.signer.verifier())
    }
}

/// Check `<stem>.sig` against the exact bytes of `json_path`.
pub fn verify_certificate(json_path: &Path, verifier: &Verifier) -> EraseResult<bool> {
    let bytes = fs::read(json_path).map_err(|e| EraseError::persistence(json_path, e))?;
    let sig_path = json_path.with_extension("sig");
    let signature = fs::read(&sig_path).map_err(|e| EraseError::persistence(&sig_path, e))?;
    Ok(verifier.verify(&bytes, &signature))
}

/// Create-new write followed by chmod 0444
fn write_immutable(path: &Path, bytes: &[u8]) -> EraseResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| EraseError::persistence(path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .and_then(|_| fs::set_permissions(path, fs::Permissions::from_mode(0o444)))
        .map_err(|e| EraseError::persistence(path, e))
}
