//! Sending half of the chunked stream engine.
//!
//! One call moves one file: header, sealed chunks in file order, the
//! end-of-file sentinel, then a bounded wait for the receiver's ack.

use std::sync::Arc;
use std::time::Instant;

use carpet_crypto::encrypt_chunk;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::files::{SendEntry, format_time, hash_file, make_size_readable};
use crate::progress::{ProgressTracker, spawn_sampler};
use crate::protocol::{
    ACK, CHUNK_SIZE, FileHeader, chunk_count, chunk_len_at, read_ack, write_chunk,
    write_end_of_file,
};
use crate::stream::{FileReport, StreamContext, megabits_per_second, or_cancel, read_full};

const DURING: &str = "send";

pub async fn send_file<S>(
    stream: &mut S,
    entry: &SendEntry,
    ctx: &StreamContext<'_>,
) -> Result<FileReport, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    let ui = ctx.ui;

    let mut file = tokio::fs::File::open(&entry.path)
        .await
        .map_err(|e| TransferError::io(format!("error opening {}", entry.path.display()), e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| TransferError::io("could not read file size", e))?
        .len();
    let md5 = hash_file(&entry.path, ctx.cancel).await?;

    ui.output(&format!(
        "File size: {}\nMD5 hash: {}",
        make_size_readable(size),
        md5
    ));
    info!(file = %entry.wire_name, bytes = size, md5 = %md5, "sending file");

    let header = FileHeader {
        name: entry.wire_name.clone(),
        size,
    };
    or_cancel(ctx.cancel, DURING, header.write_to(stream)).await??;

    ui.show_progress_bar();
    let tracker = Arc::new(ProgressTracker::new(size));
    let sampler = spawn_sampler(
        tracker.clone(),
        ui.clone(),
        ctx.cancel,
        ctx.timing.progress_interval,
    );

    stream_chunks(stream, &mut file, size, &tracker, ctx).await?;

    or_cancel(ctx.cancel, DURING, write_end_of_file(stream))
        .await?
        .map_err(|e| TransferError::io("error sending end of file", e))?;
    drop(sampler);

    // ── Completion handshake ──

    // A late ack is picked up by the next file's wait instead. Receivers never
    // read acks, so a stale one is harmless.
    let acked = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled { during: DURING }),
        acked = timeout(ctx.timing.ack_timeout, read_ack(stream)) => acked,
    };
    match acked {
        Ok(Ok(ACK)) => debug!(file = %entry.wire_name, "receiver acknowledged"),
        Ok(Ok(other)) => warn!(file = %entry.wire_name, value = other, "unexpected ack value"),
        Ok(Err(e)) => warn!(file = %entry.wire_name, error = %e, "could not read ack"),
        Err(_) => {
            warn!(file = %entry.wire_name, "no ack within {:?}", ctx.timing.ack_timeout);
            ui.output("Receiver did not confirm the file, continuing.");
        }
    }

    ui.update_progress_bar(100);
    let elapsed = start.elapsed();
    let mbps = megabits_per_second(size, elapsed);
    ui.output(&format!("Sending took {}", format_time(elapsed.as_secs_f64())));
    ui.output(&format!("Speed: {:.2}mbps", mbps));
    info!(file = %entry.wire_name, bytes = size, mbps, "file sent");

    Ok(FileReport {
        name: entry.wire_name.clone(),
        path: entry.path.clone(),
        size,
        md5,
        elapsed,
        megabits_per_second: mbps,
    })
}

/// Seal and write `size` bytes from `source` as chunks. A source that runs
/// dry early is fatal.
async fn stream_chunks<S, R>(
    stream: &mut S,
    source: &mut R,
    size: u64,
    tracker: &ProgressTracker,
    ctx: &StreamContext<'_>,
) -> Result<(), TransferError>
where
    S: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    for index in 0..chunk_count(size) {
        if ctx.cancel.is_cancelled() {
            return Err(TransferError::Cancelled { during: DURING });
        }

        let want = chunk_len_at(size, index);
        let chunk = &mut buffer[..want];
        let got = or_cancel(ctx.cancel, DURING, read_full(source, chunk))
            .await?
            .map_err(|e| TransferError::io("error reading file", e))?;
        if got != want {
            return Err(TransferError::ShortRead {
                expected: want,
                actual: got,
            });
        }

        let sealed = encrypt_chunk(chunk, &ctx.identity.key)?;
        or_cancel(ctx.cancel, DURING, write_chunk(stream, &sealed))
            .await?
            .map_err(|e| TransferError::io("error sending chunk", e))?;

        tracker.advance(want as u64);
        debug!(index, bytes = want, "chunk sent");
    }
    Ok(())
}
