use super::{Candidate, FallbackTrigger, WipeMethod, WipeResult, WipeStatus, WipeStrategy};
use crate::config::AtaPasswordPolicy;
use crate::drives::DeviceClassification;
use crate::process::{LineCallback, ProcessController, ProcessState, WipeControl};
use crate::tools::{PrivilegeToken, ToolCommand, ToolRunner};
use crate::{EraseError, EraseResult};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ATA_PASSWORD_LEN: usize = 16;
const WAIT_SLICE: Duration = Duration::from_millis(200);
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// How one method (or one pass of it) ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Completed,
    Failed(Option<i32>),
    Cancelled(Option<i32>),
}

#[derive(Debug)]
struct MethodOutcome {
    step: StepOutcome,
    passes_executed: u32,
    failing_pass: Option<u32>,
}

impl MethodOutcome {
    fn single(step: StepOutcome) -> Self {
        Self {
            passes_executed: u32::from(step == StepOutcome::Completed),
            failing_pass: match step {
                StepOutcome::Failed(_) => Some(1),
                _ => None,
            },
            step,
        }
    }
}

/// Accumulates what a run did while it is in progress
#[derive(Default)]
struct RunLog {
    output: Vec<String>,
    invocations: Vec<String>,
    notes: Vec<String>,
    last_exit: Option<i32>,
}

/// Runs a strategy's candidate chain against the host's utilities.
pub struct StrategyExecutor {
    runner: Arc<dyn ToolRunner>,
    control: WipeControl,
    privilege: Option<PrivilegeToken>,
    ata_password: AtaPasswordPolicy,
    cancel_grace: Duration,
    progress: Option<LineCallback>,
}

impl StrategyExecutor {
    pub fn new(runner: Arc<dyn ToolRunner>, control: WipeControl) -> Self {
        Self {
            runner,
            control,
            privilege: None,
            ata_password: AtaPasswordPolicy::Random,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            progress: None,
        }
    }

    pub fn with_privilege(mut self, privilege: Option<PrivilegeToken>) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn with_ata_password(mut self, policy: AtaPasswordPolicy) -> Self {
        self.ata_password = policy;
        self
    }

    /// Time between SIGTERM and SIGKILL after a cancel
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_progress(mut self, callback: Option<LineCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Synthetic result for a run that must not touch the device.
    pub fn dry_run(&self, strategy: &WipeStrategy) -> WipeResult {
        let now = Utc::now();
        let notes = strategy
            .primary()
            .map(|method| {
                self.commands_for(method, strategy, "placeholder")
                    .into_iter()
                    .map(|cmd| format!("dry run: would execute {}", cmd.display()))
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!(
            device = %strategy.target.path(),
            method = ?strategy.primary().map(|m| m.label()),
            "Dry run, nothing executed"
        );

        WipeResult {
            device: strategy.target.path().to_string(),
            kind: strategy.kind,
            target_mode: strategy.target.mode(),
            method: strategy.primary(),
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
            notes,
            status: WipeStatus::DryRun,
        }
    }

    /// Walk the candidate chain until a method succeeds, the chain ends or
    /// the operator cancels. Method-level failures end up in the result;
    /// anything else (such as a rejected credential) is returned as an error.
    pub fn execute(
        &self,
        strategy: &WipeStrategy,
        classification: Option<&DeviceClassification>,
    ) -> EraseResult<WipeResult> {
        let started_at = Utc::now();
        let mut log = RunLog::default();
        let mut attempted: Vec<WipeMethod> = Vec::new();
        let mut final_outcome: Option<MethodOutcome> = None;

        for Candidate { method, on_failure } in strategy.candidates.iter().copied() {
            if self.control.is_cancelled() {
                final_outcome = Some(MethodOutcome::single(StepOutcome::Cancelled(None)));
                break;
            }

            tracing::info!(device = %strategy.target.path(), method = method.label(), "Starting erasure method");
            attempted.push(method);
            let outcome = self.run_method(method, strategy, &mut log)?;

            let fall_back = match outcome.step {
                StepOutcome::Failed(_) => match on_failure {
                    FallbackTrigger::Terminal => false,
                    FallbackTrigger::NextIfDiscardSupported => {
                        let discard = classification.and_then(|c| c.discard_supported);
                        if discard == Some(true) {
                            log.notes.push(format!(
                                "{} failed; fell back to discard, which only guarantees the controller unmapped the blocks",
                                method
                            ));
                            true
                        } else {
                            log.notes.push(format!(
                                "{} failed and the device does not report discard support; no fallback available",
                                method
                            ));
                            false
                        }
                    }
                },
                _ => false,
            };

            tracing::info!(device = %strategy.target.path(), method = method.label(), outcome = ?outcome.step, "Erasure method finished");
            final_outcome = Some(outcome);
            if !fall_back {
                break;
            }
        }

        let outcome = final_outcome.unwrap_or_else(|| MethodOutcome::single(StepOutcome::Failed(None)));
        let status = match outcome.step {
            StepOutcome::Completed => WipeStatus::Success,
            StepOutcome::Cancelled(_) => WipeStatus::Cancelled,
            StepOutcome::Failed(_) if outcome.passes_executed > 0 => WipeStatus::Partial,
            StepOutcome::Failed(_) => WipeStatus::Failed,
        };
        if status == WipeStatus::Cancelled {
            log.notes.push("operation cancelled by operator".to_string());
        }

        let exit_code = match outcome.step {
            StepOutcome::Completed => Some(0),
            StepOutcome::Failed(code) | StepOutcome::Cancelled(code) => code,
        };

        Ok(WipeResult {
            device: strategy.target.path().to_string(),
            kind: strategy.kind,
            target_mode: strategy.target.mode(),
            method: attempted.last().copied(),
            methods_attempted: attempted,
            passes_requested: strategy.passes,
            passes_executed: outcome.passes_executed,
            failing_pass: outcome.failing_pass,
            started_at,
            finished_at: Utc::now(),
            exit_code: exit_code.or(log.last_exit),
            output: log.output,
            invocations: log.invocations,
            probe_invocations: Vec::new(),
            notes: log.notes,
            status,
        })
    }

    fn run_method(
        &self,
        method: WipeMethod,
        strategy: &WipeStrategy,
        log: &mut RunLog,
    ) -> EraseResult<MethodOutcome> {
        match method {
            WipeMethod::AtaSecureErase => self.run_ata_secure_erase(strategy, log),
            WipeMethod::ZeroFill => self.run_zero_fill(strategy, log),
            WipeMethod::NvmeFormatSecure
            | WipeMethod::BlkdiscardFallback
            | WipeMethod::SfillFreeSpace => {
                let commands = self.commands_for(method, strategy, "");
                let mut step = StepOutcome::Failed(None);
                for cmd in commands {
                    step = self.run_streamed(cmd, log)?;
                }
                Ok(MethodOutcome::single(step))
            }
        }
    }

    /// Commands a method runs, in order. `password` only feeds ATA commands.
    fn commands_for(&self, method: WipeMethod, strategy: &WipeStrategy, password: &str) -> Vec<ToolCommand> {
        let device = strategy.target.path();
        match method {
            WipeMethod::NvmeFormatSecure => vec![ToolCommand::new(method.label(), "nvme")
                .args(["format", device, "--ses=1", "--force"])],
            WipeMethod::AtaSecureErase => vec![
                ata_command("ata-set-password", "--security-set-pass", password, device),
                ata_command(method.label(), "--security-erase", password, device),
            ],
            WipeMethod::BlkdiscardFallback => {
                vec![ToolCommand::new(method.label(), "blkdiscard").args(["-v", device])]
            }
            WipeMethod::ZeroFill => vec![zero_fill_command(device, strategy.size)],
            WipeMethod::SfillFreeSpace => vec![ToolCommand::new(method.label(), "sfill")
                .args(["-v", "-l", "-l", "-z", device])],
        }
    }

    fn run_ata_secure_erase(&self, strategy: &WipeStrategy, log: &mut RunLog) -> EraseResult<MethodOutcome> {
        let device = strategy.target.path();
        let password = match &self.ata_password {
            AtaPasswordPolicy::Random => random_password(),
            AtaPasswordPolicy::Fixed(fixed) => {
                log.notes.push("ATA security password taken from configuration, not generated per run".to_string());
                fixed.clone()
            }
        };

        let mut commands = self.commands_for(WipeMethod::AtaSecureErase, strategy, &password).into_iter();
        let (Some(set_pass), Some(erase)) = (commands.next(), commands.next()) else {
            return Err(EraseError::Unsupported("ATA secure erase command set".to_string()));
        };

        match self.run_captured(&set_pass, log)? {
            Some(0) => {}
            code => {
                log.notes.push("drive rejected the temporary ATA security password".to_string());
                return Ok(MethodOutcome::single(StepOutcome::Failed(code)));
            }
        }

        let step = self.run_streamed(erase, log)?;
        match step {
            StepOutcome::Completed => {}
            StepOutcome::Failed(_) => {
                // A failed erase leaves the password set; clear it so the drive stays usable
                let disable = ata_command("ata-security-disable", "--security-disable", &password, device);
                match self.run_captured(&disable, log) {
                    Ok(Some(0)) => log.notes.push("temporary ATA security password cleared".to_string()),
                    Ok(code) => {
                        tracing::warn!(device = %device, exit_code = ?code, "Could not clear ATA security password");
                        log.notes.push("failed to clear temporary ATA security password; drive may be locked".to_string());
                    }
                    Err(e) => {
                        tracing::warn!(device = %device, error = %e, "Could not clear ATA security password");
                        log.notes.push("failed to clear temporary ATA security password; drive may be locked".to_string());
                    }
                }
            }
            StepOutcome::Cancelled(_) => {
                log.notes.push("ATA secure erase interrupted; the drive may finish the erase or remain security-locked".to_string());
            }
        }

        Ok(MethodOutcome::single(step))
    }

    fn run_zero_fill(&self, strategy: &WipeStrategy, log: &mut RunLog) -> EraseResult<MethodOutcome> {
        let mut executed = 0;
        for pass in 1..=strategy.passes {
            if self.control.is_cancelled() {
                return Ok(MethodOutcome {
                    step: StepOutcome::Cancelled(None),
                    passes_executed: executed,
                    failing_pass: None,
                });
            }

            tracing::info!(device = %strategy.target.path(), pass, of = strategy.passes, "Overwrite pass");
            let Some(cmd) = self.commands_for(WipeMethod::ZeroFill, strategy, "").pop() else {
                break;
            };
            let mark = log.output.len();
            let mut step = self.run_streamed(cmd, log)?;

            // Without a byte count dd stops at the end of the device with ENOSPC
            if strategy.size.is_none()
                && step == StepOutcome::Failed(Some(1))
                && log.output[mark..].iter().any(|l| l.contains("No space left on device"))
            {
                step = StepOutcome::Completed;
            }

            match step {
                StepOutcome::Completed => executed += 1,
                StepOutcome::Failed(_) => {
                    log.notes.push(format!("overwrite pass {} of {} failed", pass, strategy.passes));
                    return Ok(MethodOutcome {
                        step,
                        passes_executed: executed,
                        failing_pass: Some(pass),
                    });
                }
                StepOutcome::Cancelled(_) => {
                    return Ok(MethodOutcome {
                        step,
                        passes_executed: executed,
                        failing_pass: None,
                    })
                }
            }
        }

        Ok(MethodOutcome {
            step: StepOutcome::Completed,
            passes_executed: executed,
            failing_pass: None,
        })
    }

    /// Short command whose output is captured whole. `None` means the tool
    /// could not be run at all.
    fn run_captured(&self, cmd: &ToolCommand, log: &mut RunLog) -> EraseResult<Option<i32>> {
        log.invocations.push(cmd.display());
        match self.runner.execute(cmd, self.privilege.as_ref()) {
            Ok(output) => {
                log.output.extend(
                    output
                        .stdout
                        .lines()
                        .chain(output.stderr.lines())
                        .filter(|l| !l.trim().is_empty())
                        .map(str::to_string),
                );
                log.last_exit = Some(output.exit_code);
                Ok(Some(output.exit_code))
            }
            Err(e) if e.is_method_level() => {
                tracing::warn!(tool = cmd.label(), error = %e, "Tool unavailable");
                log.notes.push(format!("{}: {}", cmd.label(), e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Long-running command supervised by a process controller.
    fn run_streamed(&self, cmd: ToolCommand, log: &mut RunLog) -> EraseResult<StepOutcome> {
        log.invocations.push(cmd.display());
        let label = cmd.label().to_string();

        let mut controller = ProcessController::new(Arc::clone(&self.runner), cmd, self.privilege.clone());
        if let Some(callback) = &self.progress {
            controller = controller.with_progress(Arc::clone(callback));
        }
        let controller = Arc::new(controller);

        self.control.attach(Arc::clone(&controller));
        // A cancel that landed before attach would otherwise be missed
        if self.control.is_cancelled() {
            let _ = controller.cancel();
        }

        let result = match controller.start() {
            Ok(()) => match self.await_exit(&controller, log) {
                Err(EraseError::ProcessInterrupted(reason)) => {
                    tracing::error!(tool = %label, reason = %reason, "Lost track of erasure process");
                    log.notes.push(format!("{}: process interrupted: {}", label, reason));
                    Ok(StepOutcome::Failed(None))
                }
                other => other,
            },
            Err(EraseError::InvalidTransition { .. }) if controller.state() == ProcessState::Cancelled => {
                Ok(StepOutcome::Cancelled(None))
            }
            Err(e) if e.is_method_level() => {
                tracing::warn!(tool = %label, error = %e, "Tool unavailable");
                log.notes.push(format!("{}: {}", label, e));
                Ok(StepOutcome::Failed(None))
            }
            Err(e) => Err(e),
        };
        self.control.detach();

        let step = result?;
        if let StepOutcome::Failed(Some(code)) | StepOutcome::Cancelled(Some(code)) = step {
            log.last_exit = Some(code);
        }
        log.output.extend(controller.lines());
        Ok(step)
    }

    fn await_exit(&self, controller: &ProcessController, log: &mut RunLog) -> EraseResult<StepOutcome> {
        let mut cancelled_at: Option<Instant> = None;
        let outcome = loop {
            if let Some(outcome) = controller.wait_timeout(WAIT_SLICE)? {
                break outcome;
            }
            if controller.state() == ProcessState::Cancelled {
                let since = *cancelled_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.cancel_grace {
                    tracing::warn!(tool = controller.command().label(), "Process ignored SIGTERM, escalating");
                    let label = controller.command().label();
                    match controller.kill() {
                        Ok(()) if self.privilege.is_some() => log.notes.push(format!(
                            "{}: force-killed behind the elevation wrapper; the tool may outlive the cancel",
                            label
                        )),
                        Ok(()) => {}
                        Err(EraseError::InvalidTransition { .. }) => {
                            tracing::debug!(tool = label, "Process exited before SIGKILL");
                        }
                        Err(e) => {
                            tracing::error!(tool = label, error = %e, "Forced termination failed");
                            log.notes.push(format!("{}: forced termination failed: {}", label, e));
                        }
                    }
                    break controller.wait()?;
                }
            }
        };

        Ok(match outcome.state {
            ProcessState::Completed => StepOutcome::Completed,
            ProcessState::Cancelled => StepOutcome::Cancelled(outcome.exit_code),
            _ => StepOutcome::Failed(outcome.exit_code),
        })
    }
}

fn ata_command(label: &str, action: &str, password: &str, device: &str) -> ToolCommand {
    ToolCommand::new(label, "hdparm")
        .args(["--user-master", "u", action])
        .secret_arg(password)
        .arg(device)
}

pub(crate) fn zero_fill_command(device: &str, size: Option<u64>) -> ToolCommand {
    let mut cmd = ToolCommand::new(WipeMethod::ZeroFill.label(), "dd")
        .args(["if=/dev/zero".to_string(), format!("of={}", device), "bs=1M".to_string()]);
    if let Some(bytes) = size {
        cmd = cmd.args([format!("count={}", bytes), "iflag=count_bytes".to_string()]);
    }
    cmd.args(["conv=fsync", "status=progress"])
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ATA_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
