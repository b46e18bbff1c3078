use crate::crypto::Certificate;
use std::fmt::Write;

/// Human readable copy of a certificate. Only the JSON and its signature are
/// authoritative.
pub fn render_report(cert: &Certificate, json_sha256: &str, key_fingerprint: &str) -> String {
    let mut out = String::new();
    let rule = "=".repeat(72);
    let unknown = "unknown".to_string();

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "STORAGE ERASURE CERTIFICATE");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Certificate ID : {}", cert.certificate_id);
    let _ = writeln!(out, "Issued         : {}", cert.created_at.to_rfc3339());
    let _ = writeln!(out, "Operator       : {}", cert.operator);
    let _ = writeln!(out, "Tool           : {}", cert.tool_version);
    let _ = writeln!(out);

    let _ = writeln!(out, "DEVICE");
    let _ = writeln!(out, "  Path         : {}", cert.device.path);
    let _ = writeln!(out, "  Target       : {}", cert.target_mode);
    let _ = writeln!(
        out,
        "  Kind         : {}",
        cert.device.kind.map_or("n/a".to_string(), |k| k.to_string())
    );
    let _ = writeln!(out, "  Model        : {}", cert.device.model.as_ref().unwrap_or(&unknown));
    let _ = writeln!(out, "  Serial       : {}", cert.device.serial.as_ref().unwrap_or(&unknown));
    if let Some(size) = cert.device.size_bytes {
        let _ = writeln!(out, "  Size         : {} bytes", size);
    }
    let _ = writeln!(out);

    let duration = (cert.finished_at - cert.started_at).to_std().unwrap_or_default();
    let attempted: Vec<&str> = cert.methods_attempted.iter().map(|m| m.label()).collect();

    let _ = writeln!(out, "RESULT");
    let _ = writeln!(out, "  Status       : {}", cert.result.status.to_string().to_uppercase());
    let _ = writeln!(out, "  Method       : {}", cert.method.map_or("none", |m| m.label()));
    let _ = writeln!(
        out,
        "  Attempted    : {}",
        if attempted.is_empty() { "none".to_string() } else { attempted.join(" -> ") }
    );
    let _ = writeln!(out, "  Passes       : {}/{}", cert.passes_executed, cert.passes_requested);
    if let Some(pass) = cert.result.failing_pass {
        let _ = writeln!(out, "  Failing pass : {}", pass);
    }
    if let Some(code) = cert.result.exit_code {
        let _ = writeln!(out, "  Exit code    : {}", code);
    }
    let _ = writeln!(out, "  Started      : {}", cert.started_at.to_rfc3339());
    let _ = writeln!(out, "  Duration     : {}", humantime::format_duration(round_secs(duration)));
    let _ = writeln!(out, "  Summary      : {}", cert.result.summary);
    if cert.dry_run {
        let _ = writeln!(out, "  ** DRY RUN: no data was modified **");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "TAMPER-EVIDENCE CHECKLIST");
    for (i, entry) in cert.checklist.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, entry.claim);
        let _ = writeln!(out, "     -> {}", entry.evidence);
    }

    if !cert.notes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "NOTES");
        for note in &cert.notes {
            let _ = writeln!(out, "  - {}", note);
        }
    }

    if !cert.tool_invocations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "COMMANDS");
        for cmd in &cert.tool_invocations {
            let _ = writeln!(out, "  $ {}", cmd);
        }
    }

    if !cert.probe_invocations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "INSPECTION COMMANDS");
        for cmd in &cert.probe_invocations {
            let _ = writeln!(out, "  $ {}", cmd);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "INTEGRITY");
    let _ = writeln!(out, "  JSON SHA-256 : {}", json_sha256);
    let _ = writeln!(out, "  Signing key  : {}", key_fingerprint);
    let _ = writeln!(out, "  Verify with  : wipe-attest verify {}.json", cert.certificate_id);
    let _ = writeln!(out, "{}", rule);
    out
}

fn round_secs(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CertificateBuilder;
    use crate::strategy::{WipeMethod, WipeResult, WipeStatus};
    use crate::{DeviceKind, TargetMode};
    use chrono::{Duration, Utc};

    #[test]
    fn test_report_lists_status_checklist_and_digest() {
        let finished = Utc::now();
        let result = WipeResult {
            device: "/dev/sdx".to_string(),
            kind: Some(DeviceKind::SataSsd),
            target_mode: TargetMode::Device,
            method: Some(WipeMethod::BlkdiscardFallback),
            methods_attempted: vec![WipeMethod::AtaSecureErase, WipeMethod::BlkdiscardFallback],
            passes_requested: 1,
            passes_executed: 1,
            failing_pass: None,
            started_at: finished - Duration::seconds(95),
            finished_at: finished,
            exit_code: Some(0),
            output: Vec::new(),
            invocations: vec!["blkdiscard -v /dev/sdx".to_string()],
            probe_invocations: vec!["hdparm -I /dev/sdx".to_string()],
            notes: Vec::new(),
            status: WipeStatus::Success,
        };
        let cert = CertificateBuilder::new("op").build(None, &result, &result.methods_attempted);

        let report = render_report(&cert, "abc123", "fp456");

        assert!(report.contains("Status       : SUCCESS"));
        assert!(report.contains("ata-secure-erase -> blkdiscard-fallback"));
        assert!(report.contains("Duration     : 1m 35s"));
        assert!(report.contains("FALLBACK"));
        assert!(report.contains("JSON SHA-256 : abc123"));
        assert!(report.contains("$ blkdiscard -v /dev/sdx"));
        assert!(report.contains("INSPECTION COMMANDS\n  $ hdparm -I /dev/sdx"));
    }
}
