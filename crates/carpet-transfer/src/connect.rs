//! TCP connection establishment.
//!
//! The receiving side listens and the sending side dials. Both loops observe
//! the session's cancellation token between attempts and while blocked, so a
//! cancel lands within one accept poll or one connect timeout.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::timing::Timing;
use crate::ui::Ui;

/// Kernel socket buffer size for the transfer stream.
const SOCKET_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Bind the transfer port on all IPv4 interfaces.
pub async fn bind_listener(port: u16) -> Result<TcpListener, TransferError> {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .await
        .map_err(|source| TransferError::Listen { port, source })
}

/// Bind `port` and wait for the peer to connect.
pub async fn listen_for_peer(
    port: u16,
    cancel: &CancellationToken,
    ui: &dyn Ui,
    timing: &Timing,
) -> Result<TcpStream, TransferError> {
    let listener = bind_listener(port).await?;
    ui.output(&format!("Listening on :{}, waiting for connection....", port));
    accept_peer(&listener, cancel, ui, timing).await
}

/// Accept one connection, polling the token every `timing.accept_poll`.
pub async fn accept_peer(
    listener: &TcpListener,
    cancel: &CancellationToken,
    ui: &dyn Ui,
    timing: &Timing,
) -> Result<TcpStream, TransferError> {
    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled { during: "listen" });
        }

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled { during: "listen" }),
            polled = timeout(timing.accept_poll, listener.accept()) => polled,
        };

        match polled {
            Err(_elapsed) => continue,
            Ok(Ok((stream, peer))) => {
                info!(%peer, "connection accepted");
                tune_socket(&stream);
                ui.output("Connection accepted");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                // Not fatal; retry after one poll interval.
                debug!(error = %e, "accept failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled { during: "listen" }),
                    _ = tokio::time::sleep(timing.accept_poll) => {}
                }
            }
        }
    }
}

/// Dial `addr` until it answers, the attempt budget runs out, or the session
/// is canceled.
pub async fn dial_peer(
    addr: SocketAddr,
    cancel: &CancellationToken,
    ui: &dyn Ui,
    timing: &Timing,
) -> Result<TcpStream, TransferError> {
    let policy = timing.dial;
    ui.output(&format!("Trying to connect to {}", addr.ip()));

    for attempt in 1..=policy.attempts {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled { during: "dial" });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled { during: "dial" }),
            outcome = timeout(policy.connect_timeout, TcpStream::connect(addr)) => outcome,
        };

        match outcome {
            Ok(Ok(stream)) => {
                info!(%addr, attempt, "dialed peer");
                tune_socket(&stream);
                ui.output("Successfully dialed peer.");
                return Ok(stream);
            }
            Ok(Err(e)) => debug!(%addr, attempt, error = %e, "dial failed"),
            Err(_) => debug!(%addr, attempt, "dial timed out"),
        }
        ui.output(&format!(
            "Failed connection {:2} to {}, retrying.",
            attempt,
            addr.ip()
        ));

        if attempt < policy.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled { during: "dial" }),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }
    }

    warn!(%addr, attempts = policy.attempts, "dial attempts exhausted");
    Err(TransferError::DialExhausted {
        addr,
        attempts: policy.attempts,
    })
}

/// Nodelay plus large kernel buffers. Best-effort: a refused option only
/// costs throughput.
fn tune_socket(stream: &TcpStream) {
    let sock_ref = socket2::SockRef::from(stream);
    if let Err(e) = sock_ref.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {}", e);
    }
    if let Err(e) = sock_ref.set_send_buffer_size(SOCKET_BUF_SIZE) {
        warn!("failed to set send buffer: {}", e);
    }
    if let Err(e) = sock_ref.set_recv_buffer_size(SOCKET_BUF_SIZE) {
        warn!("failed to set recv buffer: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::timing::DialPolicy;
    use crate::ui::NullUi;

    fn fast_timing() -> Timing {
        Timing {
            dial: DialPolicy {
                attempts: 3,
                connect_timeout: Duration::from_millis(100),
                backoff: Duration::from_millis(10),
            },
            accept_poll: Duration::from_millis(50),
            ..Timing::default()
        }
    }

    /// A loopback address nothing listens on.
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn dial_exhausts_budget() {
        let addr = dead_addr().await;
        let cancel = CancellationToken::new();
        let err = dial_peer(addr, &cancel, &NullUi, &fast_timing())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::DialExhausted { attempts: 3, .. }));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn dial_honors_cancellation() {
        let addr = dead_addr().await;
        let cancel = CancellationToken::new();
        let mut timing = fast_timing();
        timing.dial.attempts = 1000;
        timing.dial.backoff = Duration::from_secs(1);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = dial_peer(addr, &cancel, &NullUi, &timing).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn accept_returns_first_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let dialer = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            dial_peer(addr, &cancel, &NullUi, &fast_timing()).await
        });

        let accepted = accept_peer(&listener, &cancel, &NullUi, &fast_timing()).await;
        assert!(accepted.is_ok());
        assert!(dialer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn accept_honors_cancellation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = accept_peer(&listener, &cancel, &NullUi, &fast_timing())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled { during: "listen" }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn listen_reports_bind_failure() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let cancel = CancellationToken::new();
        let err = listen_for_peer(port, &cancel, &NullUi, &fast_timing())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Listen { port: p, .. } if p == port));
    }
}
