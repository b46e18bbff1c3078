// Wipe Orchestrator - one erasure run from target to signed certificate
//
// prepare: validate privilege -> inspect -> plan
// execute_plan: execute (or dry run) -> build -> persist + sign
//
// Failed and cancelled runs still produce a certificate; only a rejected
// credential or a signing/persistence failure ends without one. A prepared
// plan is executed as-is, so what the operator confirmed is what runs.

use crate::config::Settings;
use crate::crypto::{Certificate, CertificateBuilder, CertificateStore, PersistedCertificate, Signer};
use crate::drives::{DeviceClassification, DeviceInspector};
use crate::process::{LineCallback, WipeControl};
use crate::strategy::{StrategyExecutor, WipeResult, WipeStatus, WipeStrategy};
use crate::tools::{privilege_check_command, InvocationLog, PrivilegeToken, ToolRunner};
use crate::{EraseError, EraseResult, TargetMode, WipeTarget};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Signed record of one run, plus where it was written
#[derive(Debug, Clone)]
pub struct WipeOutcome {
    pub certificate: Certificate,
    pub paths: PersistedCertificate,
    pub result: WipeResult,
}

/// A classified target and its chosen strategy, ready to execute
#[derive(Debug, Clone)]
pub struct WipePlan {
    pub classification: Option<DeviceClassification>,
    pub strategy: WipeStrategy,
    /// Helper commands run while preparing, redacted
    pub probe_invocations: Vec<String>,
}

pub struct Orchestrator {
    runner: Arc<dyn ToolRunner>,
    settings: Settings,
    signer: Arc<Signer>,
    privilege: Option<PrivilegeToken>,
    control: WipeControl,
    progress: Option<LineCallback>,
    probe_log: InvocationLog,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ToolRunner>, settings: Settings, signer: Arc<Signer>) -> Self {
        Self {
            runner,
            settings,
            signer,
            privilege: None,
            control: WipeControl::new(),
            progress: None,
            probe_log: InvocationLog::new(),
        }
    }

    pub fn with_privilege(mut self, privilege: Option<PrivilegeToken>) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn with_progress(mut self, callback: Option<LineCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Handle for pausing, resuming or cancelling the running erasure
    pub fn control(&self) -> WipeControl {
        self.control.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Inspector whose helper commands end up in the next prepared plan
    pub fn inspector(&self) -> DeviceInspector {
        DeviceInspector::new(Arc::clone(&self.runner), self.settings.sysfs_root.clone())
            .with_privilege(self.privilege.clone())
            .with_log(self.probe_log.clone())
    }

    /// Classify the target (unless it is free space) and choose its strategy.
    pub fn plan(&self, target: &WipeTarget, passes: u32) -> (Option<DeviceClassification>, WipeStrategy) {
        let classification = match target.mode() {
            TargetMode::FreeSpace => None,
            TargetMode::Device | TargetMode::Partition => Some(self.inspector().inspect(target.path())),
        };
        let strategy = WipeStrategy::plan(target.clone(), classification.as_ref(), passes);
        (classification, strategy)
    }

    pub fn wipe(&self, target: WipeTarget) -> EraseResult<WipeOutcome> {
        self.wipe_with_passes(target, self.settings.default_passes)
    }

    pub fn wipe_with_passes(&self, target: WipeTarget, passes: u32) -> EraseResult<WipeOutcome> {
        let plan = self.prepare(&target, passes)?;
        self.execute_plan(plan)
    }

    /// Check the credential (unless dry-running), then classify and plan.
    /// Nothing destructive runs here.
    pub fn prepare(&self, target: &WipeTarget, passes: u32) -> EraseResult<WipePlan> {
        if !self.settings.dry_run {
            if let Some(token) = &self.privilege {
                self.probe_log.record(&privilege_check_command());
                self.runner.validate_privilege(token)?;
            }
        }

        let (classification, strategy) = self.plan(target, passes);
        Ok(WipePlan {
            classification,
            strategy,
            probe_invocations: self.probe_log.take(),
        })
    }

    /// Run a prepared plan to a signed certificate.
    pub fn execute_plan(&self, plan: WipePlan) -> EraseResult<WipeOutcome> {
        let WipePlan {
            classification,
            strategy,
            probe_invocations,
        } = plan;
        let target = &strategy.target;
        let dry_run = self.settings.dry_run;
        tracing::info!(target = %target.path(), mode = %target.mode(), dry_run, "Starting erasure run");

        let mut result = if dry_run {
            self.executor().dry_run(&strategy)
        } else {
            match self.executor().execute(&strategy, classification.as_ref()) {
                Ok(result) => result,
                Err(EraseError::PrivilegeRejected) => return Err(EraseError::PrivilegeRejected),
                Err(e) => {
                    tracing::error!(target = %target.path(), error = %e, "Erasure aborted");
                    aborted_result(&strategy, &e)
                }
            }
        };
        result.probe_invocations = probe_invocations;

        let builder = CertificateBuilder::new(self.settings.operator.clone());
        let certificate = builder.build(classification.as_ref(), &result, &result.methods_attempted);

        let store = CertificateStore::new(self.settings.certificate_dir.clone(), Arc::clone(&self.signer));
        let paths = store.persist(&certificate)?;

        tracing::info!(
            target = %target.path(),
            status = %result.status,
            certificate_id = %certificate.certificate_id,
            "Erasure run attested"
        );

        Ok(WipeOutcome {
            certificate,
            paths,
            result,
        })
    }

    fn executor(&self) -> StrategyExecutor {
        StrategyExecutor::new(Arc::clone(&self.runner), self.control.clone())
            .with_privilege(self.privilege.clone())
            .with_ata_password(self.settings.ata_password.clone())
            .with_cancel_grace(Duration::from_secs(self.settings.cancel_grace_secs))
            .with_progress(self.progress.clone())
    }
}

/// Failed record for a run that broke off outside any single method
fn aborted_result(strategy: &WipeStrategy, error: &EraseError) -> WipeResult {
    let now = Utc::now();
    WipeResult {
        device: strategy.target.path().to_string(),
        kind: strategy.kind,
        target_mode: strategy.target.mode(),
        method: None,
        methods_attempted: Vec::new(),
        passes_requested: strategy.passes,
        passes_executed: 0,
        failing_pass: None,
        started_at: now,
        finished_at: now,
        exit_code: None,
        output: Vec::new(),
        invocations: Vec::new(),
        probe_invocations: Vec::new(),
        notes: vec![format!("erasure aborted before completion: {}", error)],
        status: WipeStatus::Failed,
    }
}
