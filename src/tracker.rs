//! Progress and error bookkeeping for one crawl run.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerState {
    Uninitialized,
    Active { started: Instant },
    Finished { elapsed: Duration },
}

/// Counts processed and failed items and collects error messages.
///
/// Owned by a single aggregation loop; it is never shared between tasks.
pub(crate) struct ProgressTracker {
    state: TrackerState,
    total: usize,
    processed: usize,
    failed: usize,
    errors: Vec<String>,
    debug_mode: bool,
    show_progress: bool,
    progress_bar: Option<ProgressBar>,
}

impl ProgressTracker {
    pub(crate) fn new(show_progress: bool, debug_mode: bool) -> Self {
        Self {
            state: TrackerState::Uninitialized,
            total: 0,
            processed: 0,
            failed: 0,
            errors: Vec::new(),
            debug_mode,
            show_progress,
            progress_bar: None,
        }
    }

    /// A tracker that never draws a progress bar.
    #[cfg(test)]
    pub(crate) fn quiet() -> Self {
        Self::new(false, false)
    }

    /// Starts tracking `total` items. Only the first call has an effect.
    pub(crate) fn set_total(&mut self, total: usize) {
        if self.state != TrackerState::Uninitialized {
            tracing::debug!(target: "progress_task", "Tracker total already set, ignoring set_total({})", total);
            return;
        }
        self.total = total;
        self.state = TrackerState::Active {
            started: Instant::now(),
        };

        if self.show_progress {
            let bar = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("##-"));
            }
            bar.set_message("Processing advisors");
            self.progress_bar = Some(bar);
        }
        tracing::debug!(target: "progress_task", "Starting to process {} items", total);
    }

    /// Counts one finished item. Ignored unless the tracker is active.
    pub(crate) fn record_outcome(&mut self, success: bool) {
        if !self.is_active() {
            return;
        }
        self.processed += 1;
        if !success {
            self.failed += 1;
        }
        if let Some(bar) = &self.progress_bar {
            bar.inc(1);
        }
    }

    /// Appends to the error log. Ignored unless the tracker is active.
    pub(crate) fn add_error(&mut self, message: impl Into<String>) {
        if !self.is_active() {
            return;
        }
        let message = message.into();
        if self.debug_mode {
            tracing::debug!(target: "progress_task", "Error collected: {}", message);
        }
        self.errors.push(message);
    }

    /// Stops the clock. A no-op before `set_total` or after a previous call.
    pub(crate) fn finish(&mut self) {
        let TrackerState::Active { started } = self.state else {
            return;
        };
        let elapsed = started.elapsed();
        self.state = TrackerState::Finished { elapsed };

        if let Some(bar) = &self.progress_bar {
            bar.finish_with_message("Processing complete");
        }
        tracing::debug!(target: "progress_task", "Processing completed in {:.2?}", elapsed);
        tracing::debug!(target: "progress_task", "Total items processed: {}", self.processed);
        tracing::debug!(target: "progress_task", "Successful items: {}", self.succeeded());
        tracing::debug!(target: "progress_task", "Failed items: {}", self.failed);
        if !self.errors.is_empty() {
            tracing::warn!(target: "progress_task", "Total errors encountered: {}", self.errors.len());
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(self.state, TrackerState::Active { .. })
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.state, TrackerState::Finished { .. })
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed
    }

    pub(crate) fn succeeded(&self) -> usize {
        self.processed - self.failed
    }

    pub(crate) fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Run duration: measured once finished, running time while active.
    pub(crate) fn elapsed(&self) -> Option<Duration> {
        match self.state {
            TrackerState::Uninitialized => None,
            TrackerState::Active { started } => Some(started.elapsed()),
            TrackerState::Finished { elapsed } => Some(elapsed),
        }
    }
}
