use std::io::Write;
use std::sync::Mutex;

use promptdeck_core::types::JobId;
use promptdeck_pipeline::progress::{ProgressObserver, ProgressThrottle, ProgressUpdate};

/// Prints throttled progress lines for a running job.
pub struct ConsoleNarrator<W: Write + Send> {
    inner: Mutex<NarratorState<W>>,
}

struct NarratorState<W> {
    out: W,
    throttle: ProgressThrottle,
}

impl ConsoleNarrator<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleNarrator<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Mutex::new(NarratorState {
                out,
                throttle: ProgressThrottle::default(),
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .out
    }
}

impl<W: Write + Send> ProgressObserver for ConsoleNarrator<W> {
    fn on_progress(&self, update: &ProgressUpdate) {
        let mut state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let percent = update.percent();
        if !state.throttle.should_report(percent) {
            return;
        }
        let node = update.node.as_deref().unwrap_or("?");
        // Console output is best effort.
        let _ = writeln!(state.out, "Progress: {percent}% in node {node}");
    }

    fn on_node(&self, job_id: &JobId, node: &str) {
        tracing::debug!(job_id = %job_id, node, "Node started");
    }
}
