//! Progress reporting and cooperative cancellation

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use terrashade_core::{Error, Result};

/// Receiver of progress updates, polled for cancellation between units of
/// work (a scan line, a kernel cell, a chunk).
pub trait Feedback {
    /// Overall progress in percent
    fn report(&self, _percent: f64) {}

    fn is_cancelled(&self) -> bool {
        false
    }

    /// `Err(Error::Cancelled)` once cancellation was requested
    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Feedback that ignores progress and never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Feedback for Silent {}

/// Shareable progress counter and cancel flag.
///
/// Clones share state, so one clone can be handed to the algorithm while
/// another is polled or cancelled from a different thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    /// Progress in hundredths of a percent
    progress: Arc<AtomicUsize>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Last reported progress in percent
    pub fn progress(&self) -> f64 {
        self.progress.load(Ordering::SeqCst) as f64 / 100.0
    }
}

impl Feedback for CancelFlag {
    fn report(&self, percent: f64) {
        let hundredths = (percent.clamp(0.0, 100.0) * 100.0).round() as usize;
        self.progress.store(hundredths, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<F: Feedback + ?Sized> Feedback for &F {
    fn report(&self, percent: f64) {
        (**self).report(percent)
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(flag.checkpoint().is_ok());

        handle.cancel();
        assert!(matches!(flag.checkpoint(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_progress() {
        let flag = CancelFlag::new();
        flag.report(42.5);
        assert_eq!(flag.clone().progress(), 42.5);
        flag.report(250.0);
        assert_eq!(flag.progress(), 100.0);
    }
}
