//! Progress reporting for a running job.

use promptdeck_core::types::JobId;

/// Step-level progress of the job being awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub node: Option<String>,
    pub value: u32,
    pub max: u32,
}

impl ProgressUpdate {
    /// Whole-number percentage, clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        if self.max == 0 {
            return 0;
        }
        let pct = u64::from(self.value) * 100 / u64::from(self.max);
        pct.min(100) as u8
    }
}

/// Receives progress while a call waits for completion.
///
/// Observers never influence control flow; they are called inline from
/// the wait loop and should return quickly.
///
/// Updates carry the observed call's job id. Progress frames without a job
/// id reach an observer only while its job owns the most recent node start
/// on the shared stream.
pub trait ProgressObserver: Send + Sync {
    /// One step-level progress report of the observed job.
    fn on_progress(&self, update: &ProgressUpdate);

    /// A node of the job started executing.
    fn on_node(&self, _job_id: &JobId, _node: &str) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Default reporting granularity, in percent.
pub const DEFAULT_PROGRESS_STEP: u8 = 10;

/// Suppresses progress reports until the percentage has advanced by at
/// least `step` since the last one reported.
///
/// A drop in percentage means a new progress bar started (the next
/// sampler node), so the baseline resets.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u8,
    last_reported: u8,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_STEP)
    }
}

impl ProgressThrottle {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.max(1),
            last_reported: 0,
        }
    }

    pub fn should_report(&mut self, percent: u8) -> bool {
        if percent < self.last_reported {
            self.last_reported = 0;
        }
        if percent >= self.last_reported.saturating_add(self.step) {
            self.last_reported = percent;
            return true;
        }
        false
    }
}
