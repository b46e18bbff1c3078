use super::signals::{ProcessSignals, UnixSignals, WrappedSignals};
use crate::{EraseError, EraseResult};
use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

/// Messages sudo prints when the supplied password is wrong or missing
const SUDO_REJECTION_MARKERS: [&str; 4] = [
    "incorrect password",
    "Sorry, try again",
    "a password is required",
    "is not in the sudoers file",
];

/// One external utility invocation.
///
/// Arguments are kept as discrete tokens and handed to `execve` as an argument
/// vector; nothing is ever joined into a shell string.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolCommand {
    label: String,
    program: String,
    args: Vec<String>,
    secret_args: Vec<usize>,
}

impl ToolCommand {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            secret_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an argument that must never appear in logs or audit records.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    /// Redacted command line, safe for logs and certificates
    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for (i, arg) in self.args.iter().enumerate() {
            rendered.push(' ');
            if self.secret_args.contains(&i) {
                rendered.push_str("***");
            } else {
                rendered.push_str(arg);
            }
        }
        rendered
    }
}

impl fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCommand")
            .field("label", &self.label)
            .field("command", &self.display())
            .finish()
    }
}

/// Redacted command lines of non-destructive helper invocations, in order.
/// Clones share one record.
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, command: &ToolCommand) {
        self.lock().push(command.display());
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Hand over everything recorded so far and start empty.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Credential fed to the elevation prompt's stdin. Never logged.
#[derive(Clone)]
pub struct PrivilegeToken(String);

impl PrivilegeToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivilegeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivilegeToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A launched utility whose output is streamed rather than captured.
pub trait RunningTool: Send {
    /// Hand over the output streams (stdout first, then stderr). Subsequent
    /// calls return an empty list.
    fn take_output(&mut self) -> Vec<Box<dyn Read + Send>>;

    fn signals(&self) -> Arc<dyn ProcessSignals>;

    fn try_wait(&mut self) -> io::Result<Option<i32>>;
}

/// Uniform execution seam for every external utility.
pub trait ToolRunner: Send + Sync {
    fn execute(
        &self,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<ToolOutput>;

    fn launch(
        &self,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<Box<dyn RunningTool>>;

    /// Check the token against the elevation prompt before anything destructive runs.
    fn validate_privilege(&self, privilege: &PrivilegeToken) -> EraseResult<()>;
}

/// Audit form of the credential check `validate_privilege` performs
pub fn privilege_check_command() -> ToolCommand {
    ToolCommand::new("privilege-check", "sudo").arg("-v")
}

/// Runs utilities on the host through `std::process::Command`.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &ToolCommand, privilege: Option<&PrivilegeToken>) -> Command {
        match privilege {
            Some(_) => {
                let mut cmd = Command::new("sudo");
                cmd.args(["-S", "-p", "", "--", command.program()]);
                cmd.args(command.argv());
                cmd
            }
            None => {
                let mut cmd = Command::new(command.program());
                cmd.args(command.argv());
                cmd
            }
        }
    }

    /// `sudo -v` only refreshes the credential cache; nothing else runs.
    fn validation_command() -> Command {
        let mut cmd = Command::new("sudo");
        cmd.args(["-S", "-p", "", "-v"]);
        cmd
    }

    fn spawn(
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<Child> {
        Self::spawn_built(Self::build(command, privilege), command, privilege)
    }

    fn spawn_built(
        mut cmd: Command,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<Child> {
        // Own process group: terminal signals stay with us, and a kill can
        // reach everything the tool (or sudo) started.
        cmd.process_group(0);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if privilege.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        tracing::debug!(tool = command.label(), command = %command.display(), elevated = privilege.is_some(), "Spawning tool");

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(command, privilege, e))?;

        if let Some(token) = privilege {
            if let Some(mut stdin) = child.stdin.take() {
                // Dropping stdin afterwards closes the prompt's input channel.
                let fed = stdin
                    .write_all(token.expose().as_bytes())
                    .and_then(|_| stdin.write_all(b"\n"));
                if let Err(e) = fed {
                    tracing::warn!(tool = command.label(), error = %e, "Failed to feed elevation prompt");
                }
            }
        }

        Ok(child)
    }

    fn collect(
        child: Child,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<ToolOutput> {
        let output = child
            .wait_with_output()
            .map_err(|e| EraseError::ToolExecutionFailed {
                tool: command.label().to_string(),
                reason: e.to_string(),
            })?;

        let result = ToolOutput {
            exit_code: exit_code(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if privilege.is_some() && !result.success() && is_privilege_rejection(&result.stderr) {
            return Err(EraseError::PrivilegeRejected);
        }

        tracing::debug!(tool = command.label(), exit_code = result.exit_code, "Tool finished");
        Ok(result)
    }

    fn spawn_error(
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
        err: io::Error,
    ) -> EraseError {
        if err.kind() == io::ErrorKind::NotFound {
            let missing = if privilege.is_some() {
                "sudo"
            } else {
                command.program()
            };
            EraseError::ToolNotFound(missing.to_string())
        } else {
            EraseError::ToolExecutionFailed {
                tool: command.label().to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl ToolRunner for SystemRunner {
    fn execute(
        &self,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<ToolOutput> {
        let child = Self::spawn(command, privilege)?;
        Self::collect(child, command, privilege)
    }

    fn launch(
        &self,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<Box<dyn RunningTool>> {
        let child = Self::spawn(command, privilege)?;
        let pid = child.id();
        let signals: Arc<dyn ProcessSignals> = match privilege {
            Some(token) => Arc::new(WrappedSignals::new(pid, Arc::new(self.clone()), token.clone())),
            None => Arc::new(UnixSignals::new(pid)),
        };
        Ok(Box::new(SystemProcess { child, signals }))
    }

    fn validate_privilege(&self, privilege: &PrivilegeToken) -> EraseResult<()> {
        let check = privilege_check_command();
        let child = Self::spawn_built(Self::validation_command(), &check, Some(privilege))?;
        match Self::collect(child, &check, Some(privilege)) {
            Ok(output) if output.success() => Ok(()),
            Ok(_) => Err(EraseError::PrivilegeRejected),
            Err(e) => Err(e),
        }
    }
}


struct SystemProcess {
    child: Child,
    signals: Arc<dyn ProcessSignals>,
}

impl RunningTool for SystemProcess {
    fn take_output(&mut self) -> Vec<Box<dyn Read + Send>> {
        let mut streams: Vec<Box<dyn Read + Send>> = Vec::new();
        if let Some(stdout) = self.child.stdout.take() {
            streams.push(Box::new(stdout));
        }
        if let Some(stderr) = self.child.stderr.take() {
            streams.push(Box::new(stderr));
        }
        streams
    }

    fn signals(&self) -> Arc<dyn ProcessSignals> {
        Arc::clone(&self.signals)
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| exit_code(&status)))
    }
}

/// Exit code, or 128 + signal number for signal deaths (shell convention)
pub(crate) fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

pub(crate) fn is_privilege_rejection(stderr: &str) -> bool {
    SUDO_REJECTION_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}
