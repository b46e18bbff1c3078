// Tests for lib.rs core types and the error taxonomy

use super::*;
use crate::process::ProcessState;

// ==================== DEVICE KIND TESTS ====================

#[test]
fn test_device_kind_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&DeviceKind::SataSsd).unwrap(), "\"sata_ssd\"");
    assert_eq!(serde_json::to_string(&DeviceKind::Nvme).unwrap(), "\"nvme\"");

    let parsed: DeviceKind = serde_json::from_str("\"hdd\"").unwrap();
    assert_eq!(parsed, DeviceKind::Hdd);
}

#[test]
fn test_device_kind_display_matches_serde() {
    for kind in [
        DeviceKind::Nvme,
        DeviceKind::SataSsd,
        DeviceKind::Hdd,
        DeviceKind::Unknown,
    ] {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json.trim_matches('"'), kind.to_string());
    }
}

// ==================== WIPE TARGET TESTS ====================

#[test]
fn test_wipe_target_mode_and_path() {
    let target = WipeTarget::Partition("/dev/sdb2".to_string());
    assert_eq!(target.mode(), TargetMode::Partition);
    assert_eq!(target.path(), "/dev/sdb2");

    let target = WipeTarget::FreeSpace("/mnt/data".to_string());
    assert_eq!(target.mode(), TargetMode::FreeSpace);
    assert_eq!(target.mode().to_string(), "free_space");
}

#[test]
fn test_wipe_target_serialization() {
    let json = serde_json::to_string(&WipeTarget::Device("/dev/sda".to_string())).unwrap();
    assert_eq!(json, r#"{"mode":"device","path":"/dev/sda"}"#);
}

// ==================== ERROR TESTS ====================

#[test]
fn test_method_level_errors() {
    assert!(EraseError::ToolNotFound("hdparm".to_string()).is_method_level());
    assert!(EraseError::ToolExecutionFailed {
        tool: "nvme".to_string(),
        reason: "exit 1".to_string()
    }
    .is_method_level());
    assert!(!EraseError::PrivilegeRejected.is_method_level());
    assert!(!EraseError::SigningFailed("bad key".to_string()).is_method_level());
}

#[test]
fn test_invalid_transition_message() {
    let err = EraseError::InvalidTransition {
        state: ProcessState::Completed,
        action: "pause",
    };
    assert_eq!(err.to_string(), "Cannot pause a process in state Completed");
}

#[test]
fn test_persistence_error_names_path() {
    let err = EraseError::persistence(
        "/var/lib/wipe-attest/certs/x.json",
        std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists"),
    );
    assert!(err.to_string().contains("/var/lib/wipe-attest/certs/x.json"));
}
