//! Pieces shared by the sending and receiving halves of the stream engine.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use carpet_crypto::SessionIdentity;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::timing::Timing;
use crate::ui::Ui;

/// Everything a per-file routine borrows from the session.
pub struct StreamContext<'a> {
    pub identity: &'a SessionIdentity,
    pub cancel: &'a CancellationToken,
    pub ui: &'a Arc<dyn Ui>,
    pub timing: &'a Timing,
}

/// Outcome of one file, as reported to the user.
#[derive(Debug, Clone)]
pub struct FileReport {
    /// Name as it went over the wire.
    pub name: String,
    /// Local path read from (sending) or written to (receiving).
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex MD5 of the plaintext.
    pub md5: String,
    pub elapsed: Duration,
    pub megabits_per_second: f64,
}

/// Race `fut` against the session token.
pub(crate) async fn or_cancel<F, T>(
    cancel: &CancellationToken,
    during: &'static str,
    fut: F,
) -> Result<T, TransferError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled { during }),
        out = fut => Ok(out),
    }
}

/// Read until `buf` is full or the source ends. Returns the bytes read.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub(crate) fn megabits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0 / 1_000_000.0) / secs
}
