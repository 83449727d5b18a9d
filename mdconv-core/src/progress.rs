//! Progress reporting hooks for long-running passes.

/// Receives progress updates from geometry builds and conversion passes.
///
/// Conversion engines check [`Progress::is_cancelled`] between detectors.
pub trait Progress {
    /// Reports `done` out of `total` work items.
    fn report(&mut self, done: usize, total: usize, message: &str);

    /// Returns true to stop the pass at the next detector boundary.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _done: usize, _total: usize, _message: &str) {}
}

/// Logs progress at `info` level every `step_percent` percent.
#[derive(Debug, Clone)]
pub struct LogProgress {
    step_percent: usize,
    next_percent: usize,
}

impl LogProgress {
    #[must_use]
    pub fn new(step_percent: usize) -> Self {
        let step_percent = step_percent.clamp(1, 100);
        Self {
            step_percent,
            next_percent: step_percent,
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Progress for LogProgress {
    fn report(&mut self, done: usize, total: usize, message: &str) {
        if total == 0 {
            return;
        }
        let percent = done * 100 / total;
        if percent >= self.next_percent {
            log::info!("{message}: {percent}% ({done}/{total})");
            self.next_percent = (percent / self.step_percent + 1) * self.step_percent;
        }
    }
}
