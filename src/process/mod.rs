// Process controller
//
// - controller.rs: state machine supervising one external erasure process
// - control.rs: cloneable operator handle for pause/resume/cancel

pub mod control;
pub mod controller;


pub use control::WipeControl;
pub use controller::{LineCallback, ProcessController, ProcessOutcome, ProcessState};
