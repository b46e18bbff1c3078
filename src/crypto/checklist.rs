// Tamper-evidence checklist
//
// Entries record what was attempted and what an auditor should check by hand.
// They never claim facts the tool cannot observe.

use crate::strategy::WipeMethod;
use crate::DeviceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItem {
    HiddenAreaAdvisory,
    NvmeFormat,
    AtaSecureEraseAttempted,
    DiscardAttempted,
    FilesystemUnmountedAdvisory,
    EncryptedVolumeAdvisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperChecklistEntry {
    pub item: ChecklistItem,
    pub claim: String,
    pub evidence: String,
}

impl TamperChecklistEntry {
    fn new(item: ChecklistItem, claim: &str, evidence: &str) -> Self {
        Self {
            item,
            claim: claim.to_string(),
            evidence: evidence.to_string(),
        }
    }
}

/// Build the checklist in its fixed order.
pub fn build_checklist(kind: Option<DeviceKind>, methods_attempted: &[WipeMethod]) -> Vec<TamperChecklistEntry> {
    let mut entries = vec![TamperChecklistEntry::new(
        ChecklistItem::HiddenAreaAdvisory,
        "Host Protected Area and Device Configuration Overlay were not inspected or removed",
        "Run `hdparm -N` and `hdparm --dco-identify` before release to confirm no hidden region survives",
    )];

    if kind == Some(DeviceKind::Nvme) {
        entries.push(TamperChecklistEntry::new(
            ChecklistItem::NvmeFormat,
            "NVMe format with Secure Erase Setting 1 (user data erase) was requested from the controller",
            "Confirm with `nvme id-ctrl` that the controller supports format with secure erase; other namespaces are not covered",
        ));
    }

    let ata_attempted = methods_attempted.contains(&WipeMethod::AtaSecureErase);
    if ata_attempted {
        entries.push(TamperChecklistEntry::new(
            ChecklistItem::AtaSecureEraseAttempted,
            "ATA SECURITY ERASE UNIT was attempted after setting a temporary user password",
            "Check `hdparm -I` shows security not enabled and not locked after the run",
        ));
    }

    if methods_attempted.iter().any(WipeMethod::is_discard) {
        let entry = if ata_attempted {
            TamperChecklistEntry::new(
                ChecklistItem::DiscardAttempted,
                "Discard/TRIM was issued as a FALLBACK after secure erase failed; this is a weaker guarantee than secure erase",
                "Discard only marks blocks unused; flash controllers may retain data until garbage collection. Treat this certificate as a best-effort erasure",
            )
        } else {
            TamperChecklistEntry::new(
                ChecklistItem::DiscardAttempted,
                "Discard/TRIM was issued for the whole target range",
                "Discard only marks blocks unused; confirm the device reads back zeroes after discard (`hdparm -I`, deterministic read ZEROs after TRIM)",
            )
        };
        entries.push(entry);
    }

    entries.push(TamperChecklistEntry::new(
        ChecklistItem::FilesystemUnmountedAdvisory,
        "Filesystems on the target should have been unmounted before erasure",
        "Confirm with `findmnt` that nothing on the target was mounted during the run",
    ));
    entries.push(TamperChecklistEntry::new(
        ChecklistItem::EncryptedVolumeAdvisory,
        "If the target held an encrypted volume, destroying its key slots is an independent crypto-erase",
        "For LUKS volumes run `cryptsetup erase` and record the header state; self-encrypting drives need a separate key revert",
    ));

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(entries: &[TamperChecklistEntry]) -> Vec<ChecklistItem> {
        entries.iter().map(|e| e.item).collect()
    }

    #[test]
    fn test_nvme_checklist_order() {
        let entries = build_checklist(Some(DeviceKind::Nvme), &[WipeMethod::NvmeFormatSecure]);
        assert_eq!(
            items(&entries),
            vec![
                ChecklistItem::HiddenAreaAdvisory,
                ChecklistItem::NvmeFormat,
                ChecklistItem::FilesystemUnmountedAdvisory,
                ChecklistItem::EncryptedVolumeAdvisory,
            ]
        );
    }

    #[test]
    fn test_fallback_discard_states_weaker_guarantee() {
        let entries = build_checklist(
            Some(DeviceKind::SataSsd),
            &[WipeMethod::AtaSecureErase, WipeMethod::BlkdiscardFallback],
        );
        assert_eq!(
            items(&entries),
            vec![
                ChecklistItem::HiddenAreaAdvisory,
                ChecklistItem::AtaSecureEraseAttempted,
                ChecklistItem::DiscardAttempted,
                ChecklistItem::FilesystemUnmountedAdvisory,
                ChecklistItem::EncryptedVolumeAdvisory,
            ]
        );
        assert!(entries[2].claim.contains("FALLBACK"));
        assert!(entries[2].claim.contains("weaker guarantee"));
    }

    #[test]
    fn test_baseline_only_for_overwrite_and_dry_run() {
        let overwrite = build_checklist(Some(DeviceKind::Hdd), &[WipeMethod::ZeroFill]);
        let dry_run = build_checklist(Some(DeviceKind::SataSsd), &[]);
        let free_space = build_checklist(None, &[WipeMethod::SfillFreeSpace]);

        for entries in [overwrite, dry_run, free_space] {
            assert_eq!(
                items(&entries),
                vec![
                    ChecklistItem::HiddenAreaAdvisory,
                    ChecklistItem::FilesystemUnmountedAdvisory,
                    ChecklistItem::EncryptedVolumeAdvisory,
                ]
            );
        }
    }
}
