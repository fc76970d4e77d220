//! The user interface as seen from the transfer core.
//!
//! A CLI or GUI implements [`Ui`] and hands it to
//! [`start_transfer`](crate::session::start_transfer). Calls are synchronous
//! and may come from the session task or from the progress sampler task.

/// Capabilities the core needs from whatever is showing the transfer.
pub trait Ui: Send + Sync {
    /// Append a line of human-readable status.
    fn output(&self, message: &str);

    fn show_progress_bar(&self);

    /// `percent` is 0..=100.
    fn update_progress_bar(&self, percent: u8);

    /// Called once when a session ends so the host can re-enable its controls.
    fn toggle_start_button(&self);

    /// Ask the user to confirm an optional privileged cleanup step (used by
    /// link adapters before removing a remembered network). `false` skips it.
    fn show_password_prompt(&self) -> bool;
}

/// UI that routes everything to `tracing`. Useful for headless hosts.
pub struct TracingUi;

impl Ui for TracingUi {
    fn output(&self, message: &str) {
        tracing::info!(target: "carpet_transfer::ui", "{}", message);
    }

    fn show_progress_bar(&self) {
        tracing::debug!(target: "carpet_transfer::ui", "progress bar shown");
    }

    fn update_progress_bar(&self, percent: u8) {
        tracing::debug!(target: "carpet_transfer::ui", percent, "progress");
    }

    fn toggle_start_button(&self) {}

    fn show_password_prompt(&self) -> bool {
        false
    }
}

/// UI that discards everything.
pub struct NullUi;

impl Ui for NullUi {
    fn output(&self, _message: &str) {}
    fn show_progress_bar(&self) {}
    fn update_progress_bar(&self, _percent: u8) {}
    fn toggle_start_button(&self) {}
    fn show_password_prompt(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn headless_uis_never_confirm_cleanup() {
        let uis: [Arc<dyn Ui>; 2] = [Arc::new(TracingUi), Arc::new(NullUi)];
        for ui in uis {
            ui.output("Connected");
            ui.show_progress_bar();
            ui.update_progress_bar(42);
            ui.toggle_start_button();
            assert!(!ui.show_password_prompt());
        }
    }
}
