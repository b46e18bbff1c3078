use crate::process::LineCallback;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);

/// Terminal progress for one erasure run, fed by tool output lines.
///
/// `dd status=progress` lines move the bar; anything else becomes the
/// spinner message.
pub struct WipeProgress {
    bar: ProgressBar,
    total: Option<u64>,
}

impl WipeProgress {
    pub fn new(total: Option<u64>) -> Self {
        let bar = match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.green/white}] {bytes}/{total_bytes} ({eta}) {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓░"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.enable_steady_tick(TICK);
        Self { bar, total }
    }

    /// A progress sink that draws nothing
    pub fn hidden(total: Option<u64>) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            total,
        }
    }

    pub fn handle_line(&self, line: &str) {
        match parse_bytes_copied(line) {
            Some(bytes) if self.total.is_some() => self.bar.set_position(bytes),
            Some(bytes) => self.bar.set_message(format!("{} written", human_bytes(bytes as f64))),
            None => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    self.bar.set_message(trimmed.to_string());
                }
            }
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Forward every line to this progress display
    pub fn callback(self: &Arc<Self>) -> LineCallback {
        let progress = Arc::clone(self);
        Arc::new(move |line: &str| progress.handle_line(line))
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

/// Byte count from a dd progress or summary line
pub fn parse_bytes_copied(line: &str) -> Option<u64> {
    let (count, rest) = line.trim().split_once(' ')?;
    if !rest.starts_with("bytes") || !rest.contains("copied") {
        return None;
    }
    count.parse().ok()
}

/// Human readable size with binary units
pub fn human_bytes(bytes: f64) -> String {
    if bytes <= 0.0 {
        return "0B".to_string();
    }
    let units = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes;
    let mut idx = 0;
    while value >= 1024.0 && idx < units.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{:.2}{}", value, units[idx])
}
