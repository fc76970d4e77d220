//! Progress sampling for the UI.
//!
//! The stream engine decrements a lock-free remaining-bytes counter as chunks
//! move; a helper task reads it once per interval and forwards a percentage.
//! The helper runs under a child of the session's cancellation token, so it
//! stops on session cancellation or when its guard is dropped, whichever
//! comes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::ui::Ui;

/// `100 * (size - remaining) / size`, or `None` for an empty file.
pub fn percent_done(size: u64, remaining: u64) -> Option<u8> {
    if size == 0 {
        return None;
    }
    let done = size.saturating_sub(remaining) as u128;
    Some((done * 100 / size as u128).min(100) as u8)
}

/// Bytes still to move for the file in flight.
pub struct ProgressTracker {
    total: u64,
    remaining: AtomicU64,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        ProgressTracker {
            total,
            remaining: AtomicU64::new(total),
        }
    }

    pub fn advance(&self, bytes: u64) {
        let _ = self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| {
                Some(r.saturating_sub(bytes))
            });
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn percent(&self) -> Option<u8> {
        percent_done(self.total, self.remaining())
    }
}

/// Handle to a running sampler. Dropping it stops the task.
pub struct ProgressSampler {
    handle: JoinHandle<()>,
    _guard: DropGuard,
}

impl Drop for ProgressSampler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start forwarding progress to the UI every `every`.
///
/// Returns `None` for zero-length files, which skip progress reporting.
pub fn spawn_sampler(
    tracker: Arc<ProgressTracker>,
    ui: Arc<dyn Ui>,
    session: &CancellationToken,
    every: Duration,
) -> Option<ProgressSampler> {
    if tracker.total() == 0 {
        return None;
    }

    let token = session.child_token();
    let task_token = token.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(percent) = tracker.percent() {
                        ui.update_progress_bar(percent);
                    }
                }
            }
        }
    });

    Some(ProgressSampler {
        handle,
        _guard: token.drop_guard(),
    })
}
