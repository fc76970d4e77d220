use std::time::Duration;

/// Dialer retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPolicy {
    pub attempts: u32,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Sleep between failed attempts.
    pub backoff: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        DialPolicy {
            attempts: 1000,
            connect_timeout: Duration::from_millis(500),
            backoff: Duration::from_secs(1),
        }
    }
}

/// Every timer a session uses. Defaults match what peers expect on a real
/// link; tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub dial: DialPolicy,
    /// Listener re-checks cancellation at least this often.
    pub accept_poll: Duration,
    /// How long the sender waits for the receiver's ack after each file.
    pub ack_timeout: Duration,
    pub progress_interval: Duration,
    /// Receiver deadline for a single socket read.
    pub read_timeout: Duration,
    /// Consecutive timed-out reads tolerated before the file is abandoned.
    pub read_retries: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            dial: DialPolicy::default(),
            accept_poll: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(2),
            progress_interval: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            read_retries: 3,
        }
    }
}
