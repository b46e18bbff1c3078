/// Scripted tool runner for unit tests
///
/// Responses are registered per command label. Unregistered labels behave as
/// if the utility were not installed.
use super::gateway::{PrivilegeToken, RunningTool, ToolCommand, ToolOutput, ToolRunner};
use super::signals::{Pausable, ProcessSignals};
use crate::{EraseError, EraseResult};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub struct MockCommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Launched process ignores SIGTERM and only exits on SIGKILL
    pub until_killed: bool,
}

impl MockCommandOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            until_killed: false,
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
            until_killed: false,
        }
    }

    pub fn until_killed(mut self) -> Self {
        self.until_killed = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub label: String,
    pub command: String,
    pub argv: Vec<String>,
    pub elevated: bool,
    pub streamed: bool,
}

#[derive(Default)]
pub struct MockRunner {
    responses: Mutex<HashMap<String, VecDeque<MockCommandOutput>>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `label` with `output`.
    pub fn respond(&self, label: &str, output: MockCommandOutput) -> &Self {
        self.respond_sequence(label, vec![output])
    }

    /// Answer successive calls in order; the last response repeats.
    pub fn respond_sequence(&self, label: &str, outputs: Vec<MockCommandOutput>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .insert(label.to_string(), outputs.into_iter().collect());
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.label).collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|i| i.label == label)
            .count()
    }

    fn next(&self, command: &ToolCommand, privilege: Option<&PrivilegeToken>, streamed: bool) -> EraseResult<MockCommandOutput> {
        self.invocations.lock().unwrap().push(Invocation {
            label: command.label().to_string(),
            command: command.display(),
            argv: command.argv().to_vec(),
            elevated: privilege.is_some(),
            streamed,
        });

        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(command.label())
            .ok_or_else(|| EraseError::ToolNotFound(command.program().to_string()))?;
        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        output.ok_or_else(|| EraseError::ToolNotFound(command.program().to_string()))
    }
}

impl ToolRunner for MockRunner {
    fn execute(
        &self,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<ToolOutput> {
        let output = self.next(command, privilege, false)?;
        Ok(ToolOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn launch(
        &self,
        command: &ToolCommand,
        privilege: Option<&PrivilegeToken>,
    ) -> EraseResult<Box<dyn RunningTool>> {
        let output = self.next(command, privilege, true)?;
        Ok(Box::new(MockProcess {
            stdout: Some(output.stdout),
            stderr: Some(output.stderr),
            exit_code: output.exit_code,
            until_killed: output.until_killed,
            signals: Arc::new(MockSignals::default()),
        }))
    }

    fn validate_privilege(&self, privilege: &PrivilegeToken) -> EraseResult<()> {
        if privilege.expose() == "wrong" {
            Err(EraseError::PrivilegeRejected)
        } else {
            Ok(())
        }
    }
}

struct MockProcess {
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: i32,
    until_killed: bool,
    signals: Arc<MockSignals>,
}

impl RunningTool for MockProcess {
    fn take_output(&mut self) -> Vec<Box<dyn Read + Send>> {
        [self.stdout.take(), self.stderr.take()]
            .into_iter()
            .flatten()
            .map(|text| Box::new(Cursor::new(text.into_bytes())) as Box<dyn Read + Send>)
            .collect()
    }

    fn signals(&self) -> Arc<dyn ProcessSignals> {
        Arc::clone(&self.signals) as Arc<dyn ProcessSignals>
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.until_killed {
            if self.signals.kills.load(Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            return Ok(Some(137));
        }
        Ok(Some(self.exit_code))
    }
}

#[derive(Default)]
pub struct MockSignals {
    pub stops: AtomicUsize,
    pub continues: AtomicUsize,
    pub terminations: AtomicUsize,
    pub kills: AtomicUsize,
}

impl Pausable for MockSignals {
    fn pause(&self) -> io::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> io::Result<()> {
        self.continues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ProcessSignals for MockSignals {
    fn terminate(&self) -> io::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn kill(&self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pausable(&self) -> Option<&dyn Pausable> {
        Some(self)
    }
}
