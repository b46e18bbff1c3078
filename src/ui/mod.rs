// Presentation
//
// - progress.rs: terminal progress fed by tool output
// - report.rs: human readable certificate copy

pub mod progress;
pub mod report;


pub use progress::{human_bytes, parse_bytes_copied, WipeProgress};
pub use report::render_report;
