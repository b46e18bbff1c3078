use super::controller::{ProcessController, ProcessState};
use crate::{EraseError, EraseResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Operator-facing handle onto whichever process a wipe is currently running.
///
/// Cloned freely; every clone steers the same operation. Cancelling also stops
/// the wipe from launching further passes or fallback methods.
#[derive(Clone, Default)]
pub struct WipeControl {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    active: Mutex<Option<Arc<ProcessController>>>,
    cancelled: AtomicBool,
}

impl WipeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, controller: Arc<ProcessController>) {
        *self.active() = Some(controller);
    }

    pub(crate) fn detach(&self) {
        *self.active() = None;
    }

    pub fn pause(&self) -> EraseResult<()> {
        self.current()?.pause()
    }

    pub fn resume(&self) -> EraseResult<()> {
        self.current()?.resume()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(controller) = self.active().clone() {
            if let Err(e) = controller.cancel() {
                tracing::debug!(error = %e, "Active process already finished");
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// State of the active process, if one is running
    pub fn state(&self) -> Option<ProcessState> {
        self.active().as_ref().map(|c| c.state())
    }

    fn current(&self) -> EraseResult<Arc<ProcessController>> {
        self.active()
            .clone()
            .ok_or_else(|| EraseError::Unsupported("no erasure process is running".to_string()))
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<Arc<ProcessController>>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
