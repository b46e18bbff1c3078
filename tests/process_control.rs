/// Process controller integration tests against real shell processes
///
/// The scripts print a fixed number of numbered lines slowly enough that
/// pause, resume and cancel land mid-run.
#[path = "common/mod.rs"]
mod common;

use common::system_runner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use wipe_attest::process::{ProcessController, ProcessState, WipeControl};
use wipe_attest::tools::ToolCommand;

const LINES: usize = 20;

fn counting_script(lines: usize, delay: &str) -> ToolCommand {
    ToolCommand::new("script", "sh").args([
        "-c".to_string(),
        format!("i=1; while [ $i -le {} ]; do echo line $i; i=$((i+1)); sleep {}; done", lines, delay),
    ])
}

fn wait_for_lines(controller: &ProcessController, at_least: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while controller.lines().len() < at_least {
        assert!(Instant::now() < deadline, "process produced no output");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_unpaused_run_delivers_every_line() {
    let controller = ProcessController::new(system_runner(), counting_script(LINES, "0.01"), None);
    controller.start().unwrap();

    let outcome = controller.wait().unwrap();

    assert_eq!(outcome.state, ProcessState::Completed);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.lines.len(), LINES);
    assert_eq!(outcome.lines[0], "line 1");
    assert_eq!(outcome.lines[LINES - 1], format!("line {}", LINES));
}

#[test]
fn test_pause_withholds_lines_until_resume() {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let controller = ProcessController::new(system_runner(), counting_script(LINES, "0.05"), None)
        .with_progress(Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    controller.start().unwrap();
    wait_for_lines(&controller, 3);

    controller.pause().unwrap();
    assert_eq!(controller.state(), ProcessState::Paused);
    let at_pause = delivered.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(400));
    assert_eq!(delivered.load(Ordering::SeqCst), at_pause);
    assert_eq!(controller.lines().len(), at_pause);

    controller.resume().unwrap();
    let outcome = controller.wait().unwrap();

    assert_eq!(outcome.state, ProcessState::Completed);
    assert_eq!(outcome.lines.len(), LINES);
    assert_eq!(delivered.load(Ordering::SeqCst), LINES);
    let expected: Vec<String> = (1..=LINES).map(|i| format!("line {}", i)).collect();
    assert_eq!(outcome.lines, expected);
}

#[test]
fn test_resume_without_pause_is_rejected() {
    let controller = ProcessController::new(system_runner(), counting_script(5, "0.05"), None);
    controller.start().unwrap();
    wait_for_lines(&controller, 1);

    assert!(controller.resume().is_err());
    assert_eq!(controller.wait().unwrap().state, ProcessState::Completed);
}

#[test]
fn test_cancel_terminates_running_process() {
    let controller = ProcessController::new(system_runner(), counting_script(1000, "0.05"), None);
    controller.start().unwrap();
    wait_for_lines(&controller, 2);

    controller.cancel().unwrap();
    let outcome = controller
        .wait_timeout(Duration::from_secs(10))
        .unwrap()
        .expect("process survived SIGTERM");

    assert_eq!(outcome.state, ProcessState::Cancelled);
    assert!(outcome.lines.len() < 1000);
}

#[test]
fn test_cancel_while_paused_still_terminates() {
    let controller = ProcessController::new(system_runner(), counting_script(1000, "0.05"), None);
    controller.start().unwrap();
    wait_for_lines(&controller, 2);
    controller.pause().unwrap();

    controller.cancel().unwrap();
    let outcome = controller
        .wait_timeout(Duration::from_secs(10))
        .unwrap()
        .expect("stopped process was not woken for termination");

    assert_eq!(outcome.state, ProcessState::Cancelled);
}

#[test]
fn test_kill_escalates_when_term_is_ignored() {
    let cmd = ToolCommand::new("stubborn", "sh").args([
        "-c",
        "trap '' TERM; echo ready; while true; do sleep 0.1; done",
    ]);
    let controller = ProcessController::new(system_runner(), cmd, None);
    controller.start().unwrap();
    wait_for_lines(&controller, 1);

    controller.cancel().unwrap();
    assert!(controller.wait_timeout(Duration::from_millis(300)).unwrap().is_none());

    controller.kill().unwrap();
    let outcome = controller
        .wait_timeout(Duration::from_secs(10))
        .unwrap()
        .expect("SIGKILL did not end the process");
    assert_eq!(outcome.state, ProcessState::Cancelled);
}

#[test]
fn test_wipe_control_has_nothing_to_pause_when_idle() {
    let control = WipeControl::new();
    assert!(control.pause().is_err());
    assert!(control.state().is_none());

    control.cancel();
    assert!(control.is_cancelled());
}

#[test]
fn test_missing_program_fails_to_start() {
    let cmd = ToolCommand::new("absent", "wipe-attest-no-such-tool");
    let controller = ProcessController::new(system_runner(), cmd, None);

    assert!(controller.start().is_err());
    assert_eq!(controller.state(), ProcessState::Failed);
}
