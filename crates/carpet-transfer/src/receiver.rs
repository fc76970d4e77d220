//! Receiving half of the chunked stream engine.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use carpet_crypto::decrypt_chunk;
use md5::{Digest, Md5};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::files::{format_time, make_size_readable, resolve_destination, sanitize_wire_name};
use crate::progress::{ProgressTracker, spawn_sampler};
use crate::protocol::{FileHeader, parse_chunk_len, write_ack};
use crate::stream::{FileReport, StreamContext, megabits_per_second, or_cancel};

const DURING: &str = "receive";

/// Receive one file of a batch of `total_files` into `target`.
///
/// A partially written destination file is removed if the file fails.
pub async fn receive_file<S>(
    stream: &mut S,
    target: &Path,
    total_files: u64,
    ctx: &StreamContext<'_>,
) -> Result<FileReport, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    let ui = ctx.ui;

    // The sender hashes each file before its header, so no read deadline here.
    let header = or_cancel(ctx.cancel, DURING, FileHeader::read_from(stream)).await??;
    let wire = sanitize_wire_name(&header.name)?;

    let dest = resolve_destination(target, &wire, total_files, &ctx.identity.ssid);
    if dest.redirected {
        warn!(target = %target.display(), "several files announced, writing to the parent folder");
        ui.output(&format!(
            "{} is not a folder, saving files next to it.",
            target.display()
        ));
    }
    if dest.renamed {
        info!(file = %header.name, path = %dest.path.display(), "name taken, renamed");
    }

    if let Some(parent) = dest.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io("error making folders", e))?;
    }
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&dest.path)
        .await
        .map_err(|e| TransferError::io("error creating out file", e))?;

    ui.output(&format!(
        "Filename: {}\nFile size: {}",
        dest.path.display(),
        make_size_readable(header.size)
    ));
    info!(file = %header.name, bytes = header.size, path = %dest.path.display(), "receiving file");

    ui.show_progress_bar();
    let tracker = Arc::new(ProgressTracker::new(header.size));
    let sampler = spawn_sampler(
        tracker.clone(),
        ui.clone(),
        ctx.cancel,
        ctx.timing.progress_interval,
    );

    let streamed = receive_chunks(stream, &mut out, &tracker, ctx).await;
    drop(sampler);
    let (received, md5) = match streamed {
        Ok(done) => done,
        Err(e) => {
            drop(out);
            discard_partial(&dest.path).await;
            return Err(e);
        }
    };

    or_cancel(ctx.cancel, DURING, write_ack(stream))
        .await?
        .map_err(|e| TransferError::io("error sending acknowledgement", e))?;

    if received != header.size {
        warn!(file = %header.name, expected = header.size, received, "size mismatch");
        ui.output(&format!(
            "Warning: expected {} but received {}.",
            make_size_readable(header.size),
            make_size_readable(received)
        ));
    }

    ui.update_progress_bar(100);
    let elapsed = start.elapsed();
    let mbps = megabits_per_second(received, elapsed);
    ui.output(&format!("Received file size: {}", make_size_readable(received)));
    ui.output(&format!("Received file hash: {}", md5));
    ui.output(&format!("Receiving took {}", format_time(elapsed.as_secs_f64())));
    ui.output(&format!("Speed: {:.2}mbps", mbps));
    info!(file = %header.name, bytes = received, md5 = %md5, mbps, "file received");

    Ok(FileReport {
        name: header.name,
        path: dest.path,
        size: received,
        md5,
        elapsed,
        megabits_per_second: mbps,
    })
}

/// Decrypt and append chunks until the sentinel. Returns bytes written and
/// their MD5.
async fn receive_chunks<S>(
    stream: &mut S,
    out: &mut File,
    tracker: &ProgressTracker,
    ctx: &StreamContext<'_>,
) -> Result<(u64, String), TransferError>
where
    S: AsyncRead + Unpin,
{
    let mut hasher = Md5::new();
    let mut received = 0u64;
    let mut len_buf = [0u8; 8];
    let mut sealed = Vec::new();

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(TransferError::Cancelled { during: DURING });
        }

        read_exact_patiently(stream, &mut len_buf, ctx, "error reading chunk length").await?;
        let Some(len) = parse_chunk_len(i64::from_be_bytes(len_buf))? else {
            break;
        };

        sealed.resize(len, 0);
        read_exact_patiently(stream, &mut sealed, ctx, "error reading chunk").await?;
        let plain = decrypt_chunk(&sealed, &ctx.identity.key)?;

        or_cancel(ctx.cancel, DURING, out.write_all(&plain))
            .await?
            .map_err(|e| TransferError::io("error writing to destination file", e))?;
        hasher.update(&plain);
        received += plain.len() as u64;
        tracker.advance(plain.len() as u64);
        debug!(bytes = plain.len(), "chunk received");
    }

    out.flush()
        .await
        .map_err(|e| TransferError::io("error writing to destination file", e))?;
    out.sync_all()
        .await
        .map_err(|e| TransferError::io("error syncing destination file", e))?;

    Ok((received, hex::encode(hasher.finalize())))
}

/// Fill `buf` from the socket with a deadline on every read.
///
/// A read that times out or is interrupted keeps the bytes already received
/// and is retried, up to `timing.read_retries` times in a row. End of stream
/// and any other error end the file.
async fn read_exact_patiently<S>(
    stream: &mut S,
    buf: &mut [u8],
    ctx: &StreamContext<'_>,
    context: &'static str,
) -> Result<(), TransferError>
where
    S: AsyncRead + Unpin,
{
    let retries = ctx.timing.read_retries;
    let mut filled = 0;
    let mut strikes = 0u32;

    while filled < buf.len() {
        let step = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled { during: DURING }),
            step = timeout(ctx.timing.read_timeout, stream.read(&mut buf[filled..])) => step,
        };

        let stalled = match step {
            Ok(Ok(0)) => {
                return Err(TransferError::io(
                    context,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection"),
                ));
            }
            Ok(Ok(n)) => {
                filled += n;
                strikes = 0;
                continue;
            }
            Ok(Err(e)) if is_transient(&e) => e,
            Ok(Err(e)) => return Err(TransferError::io(context, e)),
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "read timed out"),
        };

        strikes += 1;
        if strikes > retries {
            return Err(TransferError::io(context, stalled));
        }
        warn!(error = %stalled, strikes, "transient read failure");
        ctx.ui
            .output(&format!("Retrying {} more times", retries - strikes + 1));
    }
    Ok(())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial file"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use carpet_crypto::{SessionIdentity, encrypt_chunk};
    use tokio::io::duplex;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::files::{SendEntry, hash_file};
    use crate::protocol::{ACK, CHUNK_SIZE, write_chunk, write_end_of_file};
    use crate::sender::send_file;
    use crate::timing::Timing;
    use crate::ui::{NullUi, Ui};

    fn identity() -> SessionIdentity {
        SessionIdentity {
            ssid: "flyingCarpet_abcd".into(),
            key: [42u8; 32],
        }
    }

    fn quick_timing() -> Timing {
        Timing {
            read_timeout: Duration::from_millis(50),
            progress_interval: Duration::from_millis(20),
            ack_timeout: Duration::from_millis(500),
            ..Timing::default()
        }
    }

    #[derive(Default)]
    struct Transcript(Mutex<Vec<String>>);

    impl Ui for Transcript {
        fn output(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
        fn show_progress_bar(&self) {}
        fn update_progress_bar(&self, _percent: u8) {}
        fn toggle_start_button(&self) {}
        fn show_password_prompt(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn duplex_roundtrip_crosses_chunk_boundary() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..CHUNK_SIZE + 4321).map(|i| (i % 251) as u8).collect();
        let src = src_dir.path().join("pattern.bin");
        std::fs::write(&src, &data).unwrap();

        let id = identity();
        let cancel = CancellationToken::new();
        let ui: Arc<dyn Ui> = Arc::new(NullUi);
        let timing = quick_timing();
        let ctx = StreamContext {
            identity: &id,
            cancel: &cancel,
            ui: &ui,
            timing: &timing,
        };

        let (mut a, mut b) = duplex(64 * 1024);
        let entry = SendEntry {
            path: src.clone(),
            wire_name: "pattern.bin".into(),
        };
        let (sent, received) = tokio::join!(
            send_file(&mut a, &entry, &ctx),
            receive_file(&mut b, dst_dir.path(), 1, &ctx)
        );
        let sent = sent.unwrap();
        let received = received.unwrap();

        assert_eq!(received.path, dst_dir.path().join("pattern.bin"));
        assert_eq!(std::fs::read(&received.path).unwrap(), data);
        assert_eq!(sent.md5, received.md5);
        assert_eq!(received.md5, hash_file(&src, &cancel).await.unwrap());
        assert_eq!(received.size, data.len() as u64);
    }

    #[tokio::test]
    async fn tampered_chunk_fails_and_leaves_nothing() {
        let dst_dir = tempfile::tempdir().unwrap();
        let id = identity();
        let cancel = CancellationToken::new();
        let ui: Arc<dyn Ui> = Arc::new(NullUi);
        let timing = quick_timing();
        let ctx = StreamContext {
            identity: &id,
            cancel: &cancel,
            ui: &ui,
            timing: &timing,
        };

        let mut wire = Vec::new();
        let header = FileHeader {
            name: "x.bin".into(),
            size: 5,
        };
        wire.extend_from_slice(&header.encode());
        let mut sealed = encrypt_chunk(b"hello", &id.key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        write_chunk(&mut wire, &sealed).await.unwrap();
        write_end_of_file(&mut wire).await.unwrap();

        let (mut near, mut far) = duplex(4096);
        far.write_all(&wire).await.unwrap();

        let err = receive_file(&mut near, dst_dir.path(), 1, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Crypto(_)));
        assert!(!dst_dir.path().join("x.bin").exists());
    }

    #[tokio::test]
    async fn stalled_reads_are_retried() {
        let dst_dir = tempfile::tempdir().unwrap();
        let id = identity();
        let cancel = CancellationToken::new();
        let transcript = Arc::new(Transcript::default());
        let ui: Arc<dyn Ui> = transcript.clone();
        let timing = quick_timing();
        let ctx = StreamContext {
            identity: &id,
            cancel: &cancel,
            ui: &ui,
            timing: &timing,
        };

        let (mut near, mut far) = duplex(4096);
        let key = id.key;
        let peer = async move {
            let header = FileHeader {
                name: "slow.txt".into(),
                size: 4,
            };
            far.write_all(&header.encode()).await.unwrap();
            let sealed = encrypt_chunk(b"slow", &key).unwrap();
            far.write_all(&(sealed.len() as i64).to_be_bytes()).await.unwrap();
            // Two read deadlines pass before the body shows up.
            tokio::time::sleep(Duration::from_millis(120)).await;
            far.write_all(&sealed).await.unwrap();
            write_end_of_file(&mut far).await.unwrap();
            far.read_i64().await.unwrap()
        };

        let (report, ack) = tokio::join!(receive_file(&mut near, dst_dir.path(), 1, &ctx), peer);
        let report = report.unwrap();
        assert_eq!(ack, ACK);
        assert_eq!(std::fs::read(report.path).unwrap(), b"slow");
        assert!(
            transcript
                .0
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.starts_with("Retrying"))
        );
    }

    #[tokio::test]
    async fn silent_peer_exhausts_retries() {
        let dst_dir = tempfile::tempdir().unwrap();
        let id = identity();
        let cancel = CancellationToken::new();
        let ui: Arc<dyn Ui> = Arc::new(NullUi);
        let timing = quick_timing();
        let ctx = StreamContext {
            identity: &id,
            cancel: &cancel,
            ui: &ui,
            timing: &timing,
        };

        let (mut near, mut far) = duplex(4096);
        let header = FileHeader {
            name: "stuck.bin".into(),
            size: 10,
        };
        far.write_all(&header.encode()).await.unwrap();

        let err = receive_file(&mut near, dst_dir.path(), 1, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { ref source, .. } if source.kind() == io::ErrorKind::TimedOut));
        assert!(!err.is_cancelled());
        drop(far);
    }

    #[tokio::test]
    async fn path_traversal_is_refused() {
        let dst_dir = tempfile::tempdir().unwrap();
        let id = identity();
        let cancel = CancellationToken::new();
        let ui: Arc<dyn Ui> = Arc::new(NullUi);
        let timing = quick_timing();
        let ctx = StreamContext {
            identity: &id,
            cancel: &cancel,
            ui: &ui,
            timing: &timing,
        };

        let (mut near, mut far) = duplex(4096);
        let header = FileHeader {
            name: "../escape.txt".into(),
            size: 1,
        };
        far.write_all(&header.encode()).await.unwrap();

        let err = receive_file(&mut near, dst_dir.path(), 1, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }
}
