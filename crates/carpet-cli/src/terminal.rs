use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use carpet_transfer::Ui;

const BAR_WIDTH: usize = 40;

/// Prints status lines to stdout and draws the progress bar in place.
pub struct TerminalUi {
    bar_visible: AtomicBool,
}

impl TerminalUi {
    pub fn new() -> Self {
        TerminalUi {
            bar_visible: AtomicBool::new(false),
        }
    }

    /// End the progress line so the next message starts on its own line.
    fn break_bar(&self) {
        if self.bar_visible.swap(false, Ordering::Relaxed) {
            println!();
        }
    }
}

pub fn render_bar(percent: u8) -> String {
    let percent = percent.min(100) as usize;
    let filled = percent * BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        percent
    )
}

impl Ui for TerminalUi {
    fn output(&self, message: &str) {
        self.break_bar();
        println!("{}", message);
    }

    fn show_progress_bar(&self) {
        self.break_bar();
    }

    fn update_progress_bar(&self, percent: u8) {
        self.bar_visible.store(true, Ordering::Relaxed);
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\r{}", render_bar(percent));
        let _ = stdout.flush();
    }

    fn toggle_start_button(&self) {
        self.break_bar();
    }

    fn show_password_prompt(&self) -> bool {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return false;
        }
        self.break_bar();
        print!("Remove the transfer network from saved networks? [y/N] ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_rendering() {
        assert_eq!(render_bar(0), format!("[{}]   0%", " ".repeat(BAR_WIDTH)));
        assert_eq!(render_bar(100), format!("[{}] 100%", "#".repeat(BAR_WIDTH)));
        assert!(render_bar(50).starts_with(&format!("[{} ", "#".repeat(BAR_WIDTH / 2))));
        assert_eq!(render_bar(250), render_bar(100));
    }
}
