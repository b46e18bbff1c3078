// Attestation builder
//
// - signer.rs: durable ECDSA P-256 key pair and detached signatures
// - checklist.rs: tamper-evidence checklist in its fixed order
// - certificates.rs: certificate record, persistence and verification

pub mod certificates;
pub mod checklist;
pub mod signer;

pub use certificates::{
    verify_certificate, Certificate, CertificateBuilder, CertificateDevice, CertificateResult,
    CertificateStore, PersistedCertificate, OUTPUT_TAIL_LINES,
};
pub use checklist::{build_checklist, ChecklistItem, TamperChecklistEntry};
pub use signer::{Signer, Verifier};
