// Lifecycle supervision of one external erasure process
//
// Created -> Running -> {Paused <-> Running} -> {Completed | Failed | Cancelled}
//
// Output is read by one thread per stream and funnelled through a single
// dispatcher worker, which is the only place lines reach the progress callback.
// While the controller is paused the dispatcher withholds lines, so nothing is
// delivered between pause() returning and resume() being called. A line still
// in flight when the process is cancelled may be dropped.

use crate::tools::{PrivilegeToken, ProcessSignals, RunningTool, ToolCommand, ToolRunner};
use crate::{EraseError, EraseResult};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Completed | ProcessState::Failed | ProcessState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub lines: Vec<String>,
}

struct Inner {
    state: ProcessState,
    delivering: bool,
    dispatcher: Option<ThreadId>,
    lines: Vec<String>,
    exit_code: Option<i32>,
    launched: bool,
    // Exit status collected; the PID may already belong to someone else.
    reaped: bool,
    finished: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ProcessController {
    runner: Arc<dyn ToolRunner>,
    command: ToolCommand,
    privilege: Option<PrivilegeToken>,
    on_line: Option<LineCallback>,
    shared: Arc<Shared>,
    process: Mutex<Option<Box<dyn RunningTool>>>,
    signals: Mutex<Option<Arc<dyn ProcessSignals>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessController {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        command: ToolCommand,
        privilege: Option<PrivilegeToken>,
    ) -> Self {
        Self {
            runner,
            command,
            privilege,
            on_line: None,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ProcessState::Created,
                    delivering: false,
                    dispatcher: None,
                    lines: Vec::new(),
                    exit_code: None,
                    launched: false,
                    reaped: false,
                    finished: false,
                }),
                changed: Condvar::new(),
            }),
            process: Mutex::new(None),
            signals: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Forward every output line to `callback`, in production order per stream.
    pub fn with_progress(mut self, callback: LineCallback) -> Self {
        self.on_line = Some(callback);
        self
    }

    pub fn command(&self) -> &ToolCommand {
        &self.command
    }

    pub fn state(&self) -> ProcessState {
        self.shared.lock().state
    }

    /// Lines delivered so far
    pub fn lines(&self) -> Vec<String> {
        self.shared.lock().lines.clone()
    }

    /// Whether the running process honors stop/continue.
    pub fn is_pausable(&self) -> bool {
        self.current_signals()
            .map(|s| s.pausable().is_some())
            .unwrap_or(false)
    }

    pub fn start(&self) -> EraseResult<()> {
        {
            let mut inner = self.shared.lock();
            if inner.state != ProcessState::Created {
                return Err(EraseError::InvalidTransition {
                    state: inner.state,
                    action: "start",
                });
            }
            inner.state = ProcessState::Running;
        }

        let mut tool = match self.runner.launch(&self.command, self.privilege.as_ref()) {
            Ok(tool) => tool,
            Err(e) => {
                let mut inner = self.shared.lock();
                if inner.state != ProcessState::Cancelled {
                    inner.state = ProcessState::Failed;
                }
                self.shared.changed.notify_all();
                return Err(e);
            }
        };

        self.shared.lock().launched = true;
        tracing::info!(tool = self.command.label(), command = %self.command.display(), "Process started");

        let streams = tool.take_output();
        let signals = tool.signals();
        *lock(&self.signals) = Some(Arc::clone(&signals));
        *lock(&self.process) = Some(tool);

        // cancel() may have raced with the launch before signals were available.
        {
            let inner = self.shared.lock();
            if inner.state == ProcessState::Cancelled && !inner.reaped {
                let _ = signals.terminate();
            }
        }

        let (tx, rx) = mpsc::channel::<String>();
        let mut workers = lock(&self.workers);
        for stream in streams {
            let tx = tx.clone();
            workers.push(thread::spawn(move || {
                read_lines(stream, |line| tx.send(line).is_ok());
            }));
        }
        drop(tx);

        let shared = Arc::clone(&self.shared);
        let on_line = self.on_line.clone();
        workers.push(thread::spawn(move || dispatch(shared, rx, on_line)));

        Ok(())
    }

    pub fn pause(&self) -> EraseResult<()> {
        let signals = self.require_signals("pause")?;
        let pausable = signals.pausable().ok_or_else(|| {
            EraseError::Unsupported(format!(
                "{} does not honor stop/continue signals",
                self.command.label()
            ))
        })?;

        {
            let mut inner = self.shared.lock();
            if inner.state != ProcessState::Running {
                return Err(EraseError::InvalidTransition {
                    state: inner.state,
                    action: "pause",
                });
            }
            inner.state = ProcessState::Paused;

            // A callback may pause from the dispatcher thread itself.
            let on_dispatcher = inner.dispatcher == Some(thread::current().id());
            while inner.delivering && !on_dispatcher {
                inner = self
                    .shared
                    .changed
                    .wait(inner)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }

        if let Err(e) = pausable.pause() {
            let mut inner = self.shared.lock();
            if inner.state == ProcessState::Paused {
                inner.state = ProcessState::Running;
            }
            self.shared.changed.notify_all();
            return Err(e.into());
        }

        tracing::info!(tool = self.command.label(), "Process paused");
        Ok(())
    }

    pub fn resume(&self) -> EraseResult<()> {
        let signals = self.require_signals("resume")?;
        let pausable = signals.pausable().ok_or_else(|| {
            EraseError::Unsupported(format!(
                "{} does not honor stop/continue signals",
                self.command.label()
            ))
        })?;

        let mut inner = self.shared.lock();
        if inner.state != ProcessState::Paused {
            return Err(EraseError::InvalidTransition {
                state: inner.state,
                action: "resume",
            });
        }
        pausable.resume()?;
        inner.state = ProcessState::Running;
        self.shared.changed.notify_all();

        tracing::info!(tool = self.command.label(), "Process resumed");
        Ok(())
    }

    /// Request termination. Best effort: the process may outlive this call, so
    /// callers needing a guarantee poll `wait_timeout` and escalate to `kill`.
    ///
    /// Rejected once the exit status has been collected, even while output is
    /// still draining.
    pub fn cancel(&self) -> EraseResult<()> {
        let mut inner = self.shared.lock();
        if inner.state.is_terminal() || inner.reaped {
            return Err(EraseError::InvalidTransition {
                state: inner.state,
                action: "cancel",
            });
        }
        let previous = inner.state;
        inner.state = ProcessState::Cancelled;
        self.shared.changed.notify_all();

        // Signalled under the state lock so a concurrent reap cannot free the PID first.
        if let Some(signals) = self.current_signals() {
            if let Err(e) = signals.terminate() {
                tracing::warn!(tool = self.command.label(), error = %e, "Termination signal not delivered");
            }
            // A stopped process only acts on SIGTERM once continued.
            if previous == ProcessState::Paused {
                if let Some(pausable) = signals.pausable() {
                    let _ = pausable.resume();
                }
            }
        }
        drop(inner);

        tracing::warn!(tool = self.command.label(), "Process cancelled");
        Ok(())
    }

    /// Forceful escalation after a cancel was ignored.
    pub fn kill(&self) -> EraseResult<()> {
        let mut inner = self.shared.lock();
        if inner.reaped {
            return Err(EraseError::InvalidTransition {
                state: inner.state,
                action: "kill",
            });
        }
        if !inner.state.is_terminal() {
            inner.state = ProcessState::Cancelled;
            self.shared.changed.notify_all();
        }
        if let Some(signals) = self.current_signals() {
            signals.kill()?;
            tracing::warn!(tool = self.command.label(), "Process killed");
        }
        Ok(())
    }

    /// Block until the process exits.
    pub fn wait(&self) -> EraseResult<ProcessOutcome> {
        self.wait_until(None)
            .map(|outcome| outcome.unwrap_or_else(|| self.snapshot()))
    }

    /// Wait at most `timeout`; `None` means the process is still alive.
    pub fn wait_timeout(&self, timeout: Duration) -> EraseResult<Option<ProcessOutcome>> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> EraseResult<Option<ProcessOutcome>> {
        loop {
            {
                let mut guard = lock(&self.process);
                match guard.as_mut() {
                    Some(tool) => {
                        if let Some(code) = self.reap(&mut **tool)? {
                            guard.take();
                            drop(guard);
                            return Ok(Some(self.finish(code)));
                        }
                    }
                    None => {
                        drop(guard);
                        return self.wait_for_other_waiter(deadline);
                    }
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }

    /// Collect the exit status if the process has exited. Runs under the state
    /// lock so cancel() and kill() see either a live PID or `reaped`.
    fn reap(&self, tool: &mut dyn RunningTool) -> EraseResult<Option<i32>> {
        let mut inner = self.shared.lock();
        let exited = tool
            .try_wait()
            .map_err(|e| EraseError::ProcessInterrupted(e.to_string()))?;
        if let Some(code) = exited {
            inner.reaped = true;
            inner.exit_code = Some(code);
            lock(&self.signals).take();
            self.shared.changed.notify_all();
        }
        Ok(exited)
    }

    fn wait_for_other_waiter(
        &self,
        deadline: Option<Instant>,
    ) -> EraseResult<Option<ProcessOutcome>> {
        let mut inner = self.shared.lock();
        loop {
            if inner.state == ProcessState::Created {
                return Err(EraseError::InvalidTransition {
                    state: inner.state,
                    action: "wait on",
                });
            }
            if inner.state.is_terminal() && (!inner.launched || inner.finished) {
                return Ok(Some(ProcessOutcome {
                    state: inner.state,
                    exit_code: inner.exit_code,
                    lines: inner.lines.clone(),
                }));
            }

            let wait_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            inner = self
                .shared
                .changed
                .wait_timeout(inner, wait_for)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Settle the terminal state after a reap. `Cancelled` at this point can
    /// only come from a cancel that landed before the exit status was collected.
    fn finish(&self, code: i32) -> ProcessOutcome {
        let cancelled = {
            let mut inner = self.shared.lock();
            // An exited process can no longer be resumed; release the dispatcher.
            if inner.state == ProcessState::Paused {
                inner.state = ProcessState::Running;
            }
            self.shared.changed.notify_all();
            inner.state == ProcessState::Cancelled
        };

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        if !cancelled {
            for worker in workers {
                let _ = worker.join();
            }
        }

        let mut inner = self.shared.lock();
        if inner.state != ProcessState::Cancelled {
            inner.state = if code == 0 {
                ProcessState::Completed
            } else {
                ProcessState::Failed
            };
        }
        inner.finished = true;
        self.shared.changed.notify_all();

        tracing::info!(
            tool = self.command.label(),
            exit_code = code,
            state = ?inner.state,
            lines = inner.lines.len(),
            "Process finished"
        );

        ProcessOutcome {
            state: inner.state,
            exit_code: Some(code),
            lines: inner.lines.clone(),
        }
    }

    fn snapshot(&self) -> ProcessOutcome {
        let inner = self.shared.lock();
        ProcessOutcome {
            state: inner.state,
            exit_code: inner.exit_code,
            lines: inner.lines.clone(),
        }
    }

    fn current_signals(&self) -> Option<Arc<dyn ProcessSignals>> {
        lock(&self.signals).clone()
    }

    fn require_signals(&self, action: &'static str) -> EraseResult<Arc<dyn ProcessSignals>> {
        self.current_signals().ok_or_else(|| EraseError::InvalidTransition {
            state: self.state(),
            action,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch(shared: Arc<Shared>, rx: mpsc::Receiver<String>, on_line: Option<LineCallback>) {
    shared.lock().dispatcher = Some(thread::current().id());

    for line in rx {
        {
            let mut inner = shared.lock();
            while inner.state == ProcessState::Paused {
                inner = shared
                    .changed
                    .wait(inner)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if inner.state == ProcessState::Cancelled {
                continue;
            }
            inner.lines.push(line.clone());
            inner.delivering = true;
        }

        if let Some(callback) = &on_line {
            callback(&line);
        }

        let mut inner = shared.lock();
        inner.delivering = false;
        shared.changed.notify_all();
    }
}

/// Split a byte stream into lines on `\n` or `\r`; progress meters rewrite a
/// single terminal line with carriage returns.
pub(crate) fn read_lines(mut stream: Box<dyn Read + Send>, mut emit: impl FnMut(String) -> bool) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for &byte in &buf[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            let line = String::from_utf8_lossy(&pending).into_owned();
                            pending.clear();
                            if !emit(line) {
                                return;
                            }
                        }
                    } else {
                        pending.push(byte);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    if !pending.is_empty() {
        emit(String::from_utf8_lossy(&pending).into_owned());
    }
}
