// External tool gateway
//
// - gateway.rs: command model, privilege token, runner seam and host runner
// - signals.rs: stop/continue/terminate delivery to launched utilities

pub mod gateway;
pub mod signals;

#[cfg(test)]
pub(crate) mod mock;

pub use gateway::{
    privilege_check_command, InvocationLog, PrivilegeToken, RunningTool, SystemRunner, ToolCommand,
    ToolOutput, ToolRunner,
};
pub use signals::{Pausable, ProcessSignals, UnixSignals, WrappedSignals};
