/// Concurrent erasure integration tests
///
/// Two orchestrators run real `dd` zero-fills against separate file-backed
/// drives at the same time. Each run must touch only its own target and
/// certify only its own work.
#[path = "common/mod.rs"]
mod common;

use common::{settings_in, signer_in, system_runner, verify_all_zeros, FakeDrive};
use std::path::Path;
use std::thread;
use tempfile::TempDir;
use wipe_attest::crypto::CertificateStore;
use wipe_attest::strategy::{WipeMethod, WipeStatus};
use wipe_attest::{DeviceKind, Orchestrator, WipeOutcome, WipeTarget};

const DRIVE_SIZE: u64 = 256 * 1024;

fn orchestrator_for(dir: &Path) -> Orchestrator {
    Orchestrator::new(system_runner(), settings_in(dir), signer_in(dir))
}

fn wipe_in_thread(dir: &Path, drive: &FakeDrive) -> thread::JoinHandle<WipeOutcome> {
    let orchestrator = orchestrator_for(dir);
    let target = WipeTarget::Device(drive.path_str().to_string());

    // Never start dd without a byte count against a regular file
    let (_, strategy) = orchestrator.plan(&target, 2);
    assert_eq!(strategy.size, Some(drive.size));
    assert_eq!(strategy.primary(), Some(WipeMethod::ZeroFill));

    thread::spawn(move || orchestrator.wipe_with_passes(target, 2).unwrap())
}

#[test]
fn test_single_zero_fill_end_to_end() {
    let dir = TempDir::new().unwrap();
    let drive = FakeDrive::create(dir.path(), "solo.img", DRIVE_SIZE, 0xAB);

    let outcome = wipe_in_thread(dir.path(), &drive).join().unwrap();

    assert_eq!(outcome.result.status, WipeStatus::Success, "{:?}", outcome.result.notes);
    assert_eq!(outcome.certificate.device.kind, Some(DeviceKind::Hdd));
    assert_eq!(outcome.certificate.passes_executed, 2);
    assert_eq!(outcome.certificate.device.size_bytes, Some(DRIVE_SIZE));
    assert!(verify_all_zeros(&drive.path).unwrap());
    assert_eq!(std::fs::metadata(&drive.path).unwrap().len(), DRIVE_SIZE);

    let store = CertificateStore::new(dir.path().join("certs"), signer_in(dir.path()));
    assert!(store.verify(&outcome.paths.json_path).unwrap());
}

#[test]
fn test_two_concurrent_wipes_do_not_cross_contaminate() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let drive_a = FakeDrive::create(dir_a.path(), "drive-a.img", DRIVE_SIZE, 0x11);
    let drive_b = FakeDrive::create(dir_b.path(), "drive-b.img", DRIVE_SIZE * 2, 0x22);

    let handle_a = wipe_in_thread(dir_a.path(), &drive_a);
    let handle_b = wipe_in_thread(dir_b.path(), &drive_b);
    let outcome_a = handle_a.join().unwrap();
    let outcome_b = handle_b.join().unwrap();

    for (outcome, drive, other) in [
        (&outcome_a, &drive_a, &drive_b),
        (&outcome_b, &drive_b, &drive_a),
    ] {
        let cert = &outcome.certificate;
        assert_eq!(cert.result.status, WipeStatus::Success, "{:?}", cert.notes);
        assert_eq!(cert.device.path, drive.path_str());
        assert_eq!(cert.device.size_bytes, Some(drive.size));
        assert_eq!(cert.tool_invocations.len(), 2);
        assert!(cert
            .tool_invocations
            .iter()
            .all(|cmd| cmd.contains(drive.path_str()) && !cmd.contains(other.path_str())));
        assert!(cert
            .output_tail
            .iter()
            .all(|line| !line.contains(other.path_str())));
        assert!(verify_all_zeros(&drive.path).unwrap());
    }

    assert_ne!(outcome_a.certificate.certificate_id, outcome_b.certificate.certificate_id);
    assert!(outcome_a.paths.json_path.starts_with(dir_a.path()));
    assert!(outcome_b.paths.json_path.starts_with(dir_b.path()));
}

#[test]
fn test_cancelled_orchestrator_leaves_neighbour_untouched() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let drive_a = FakeDrive::create(dir_a.path(), "keep.img", DRIVE_SIZE, 0x5A);
    let drive_b = FakeDrive::create(dir_b.path(), "wipe.img", DRIVE_SIZE, 0x5A);

    let cancelled = orchestrator_for(dir_a.path());
    cancelled.control().cancel();
    let kept = cancelled
        .wipe(WipeTarget::Device(drive_a.path_str().to_string()))
        .unwrap();
    let wiped = wipe_in_thread(dir_b.path(), &drive_b).join().unwrap();

    assert_eq!(kept.result.status, WipeStatus::Cancelled);
    assert!(kept.certificate.methods_attempted.is_empty());
    assert!(std::fs::read(&drive_a.path).unwrap().iter().all(|&b| b == 0x5A));

    assert_eq!(wiped.result.status, WipeStatus::Success);
    assert!(verify_all_zeros(&drive_b.path).unwrap());
}
