//! The transfer state machine.
//!
//! ```text
//! KeyDerivation -> LinkProvision -> TcpConnect -> ManifestExchange -> PerFileLoop -> Teardown
//! ```
//!
//! Any state may jump straight to `Teardown`. Teardown always resets the link
//! exactly once before [`start_transfer`] returns.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use carpet_crypto::{CryptoError, SessionIdentity, derive_session_identity};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connect::{dial_peer, listen_for_peer};
use crate::error::TransferError;
use crate::files::{SendEntry, check_receive_target, plan_send};
use crate::link::{LinkProvisioner, LinkTask};
use crate::protocol::{read_count, write_count};
use crate::receiver::receive_file;
use crate::sender::send_file;
use crate::stream::{FileReport, StreamContext, or_cancel};
use crate::timing::Timing;
use crate::ui::Ui;

pub const DEFAULT_PORT: u16 = 3290;

const RULE: &str = "=============================";

// ── Session data ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Files and folders to send, in order.
    Sending(Vec<PathBuf>),
    /// Folder (or, for a single file, file path) to receive into.
    Receiving(PathBuf),
}

/// Operating system of the other host. Link adapters may use it to decide
/// who hosts the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOs {
    Linux,
    Mac,
    Windows,
    Android,
    Ios,
}

impl fmt::Display for PeerOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeerOs::Linux => "linux",
            PeerOs::Mac => "mac",
            PeerOs::Windows => "windows",
            PeerOs::Android => "android",
            PeerOs::Ios => "ios",
        })
    }
}

impl FromStr for PeerOs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(PeerOs::Linux),
            "mac" | "macos" | "darwin" => Ok(PeerOs::Mac),
            "windows" => Ok(PeerOs::Windows),
            "android" => Ok(PeerOs::Android),
            "ios" => Ok(PeerOs::Ios),
            other => Err(format!("unknown peer OS {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Configured,
    KeyDerivation,
    LinkProvision,
    TcpConnect,
    ManifestExchange,
    PerFileLoop,
    Teardown,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferState::Configured => "configured",
            TransferState::KeyDerivation => "key derivation",
            TransferState::LinkProvision => "link provisioning",
            TransferState::TcpConnect => "tcp connect",
            TransferState::ManifestExchange => "manifest exchange",
            TransferState::PerFileLoop => "per-file loop",
            TransferState::Teardown => "teardown",
        })
    }
}

/// One transfer attempt. Build it from user input, hand it to
/// [`start_transfer`], drop it afterwards.
pub struct Transfer {
    pub mode: Mode,
    pub peer: PeerOs,
    pub port: u16,
    pub password: String,
    /// Set during key derivation.
    pub identity: Option<SessionIdentity>,
    /// Set by the link provisioner on the sending side.
    pub recipient_ip: Option<IpAddr>,
    /// Cancel this to stop the session from another task.
    pub token: CancellationToken,
    /// Background link helper owned by the link provisioner.
    pub link_task: Option<LinkTask>,
    pub timing: Timing,
    state: TransferState,
}

impl Transfer {
    pub fn new(mode: Mode, peer: PeerOs, password: impl Into<String>) -> Self {
        Transfer {
            mode,
            peer,
            port: DEFAULT_PORT,
            password: password.into(),
            identity: None,
            recipient_ip: None,
            token: CancellationToken::new(),
            link_task: None,
            timing: Timing::default(),
            state: TransferState::Configured,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.mode, Mode::Sending(_))
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn ssid(&self) -> Option<&str> {
        self.identity.as_ref().map(|id| id.ssid.as_str())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn enter(&mut self, state: TransferState) {
        info!(%state, "transfer state");
        self.state = state;
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("mode", &self.mode)
            .field("peer", &self.peer)
            .field("port", &self.port)
            .field("identity", &self.identity)
            .field("recipient_ip", &self.recipient_ip)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub files: Vec<FileReport>,
    pub elapsed: Duration,
}

// ── Entry points ──

/// Run one session to completion, failure, or cancellation.
///
/// On failure the UI gets the cause and then "Aborting transfer.". In every
/// case the link is reset once, then the progress bar and start button are
/// restored.
pub async fn start_transfer<L>(
    transfer: &mut Transfer,
    ui: Arc<dyn Ui>,
    link: &L,
) -> Result<TransferSummary, TransferError>
where
    L: LinkProvisioner,
{
    let started = Instant::now();
    let outcome = run(transfer, &ui, link).await;

    if let Err(e) = &outcome {
        if e.is_cancelled() {
            info!(state = %transfer.state(), "transfer canceled");
        } else {
            error!(state = %transfer.state(), error = %e, "transfer failed");
        }
        ui.output(&e.user_message());
        ui.output("Aborting transfer.");
    }

    transfer.enter(TransferState::Teardown);
    link.reset_wifi(transfer, ui.as_ref()).await;

    if outcome.is_err() {
        ui.update_progress_bar(0);
    }
    ui.toggle_start_button();

    outcome.map(|files| TransferSummary {
        files,
        elapsed: started.elapsed(),
    })
}

/// [`start_transfer`] for hosts without an async runtime.
pub fn start_transfer_blocking<L>(
    transfer: &mut Transfer,
    ui: Arc<dyn Ui>,
    link: &L,
) -> Result<TransferSummary, TransferError>
where
    L: LinkProvisioner,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TransferError::io("could not start the async runtime", e))?;
    runtime.block_on(start_transfer(transfer, ui, link))
}

// ── Phases ──

async fn run<L>(
    transfer: &mut Transfer,
    ui: &Arc<dyn Ui>,
    link: &L,
) -> Result<Vec<FileReport>, TransferError>
where
    L: LinkProvisioner,
{
    transfer.enter(TransferState::KeyDerivation);
    ui.output(&format!("\nStarting Transfer\n{}", RULE));
    let identity = derive_identity(transfer).await?;
    info!(ssid = %identity.ssid, "session identity derived");
    transfer.identity = Some(identity.clone());

    let plan = match &transfer.mode {
        Mode::Sending(paths) => Some(plan_send(paths)?),
        Mode::Receiving(target) => {
            check_receive_target(target)?;
            ui.output(&format!(
                "Transfer password: {}\nPlease use this password on sending end when prompted to start transfer.\n{}\n",
                transfer.password, RULE
            ));
            None
        }
    };

    transfer.enter(TransferState::LinkProvision);
    link.connect_to_peer(transfer, ui.as_ref()).await?;
    if transfer.token.is_cancelled() {
        return Err(TransferError::Cancelled { during: "link provisioning" });
    }

    transfer.enter(TransferState::TcpConnect);
    let token = transfer.token.clone();
    let timing = transfer.timing;
    let mut stream = if plan.is_some() {
        let ip = transfer.recipient_ip.ok_or(TransferError::MissingPeerAddress)?;
        dial_peer(SocketAddr::new(ip, transfer.port), &token, ui.as_ref(), &timing).await?
    } else {
        listen_for_peer(transfer.port, &token, ui.as_ref(), &timing).await?
    };
    ui.output("Connected");

    transfer.enter(TransferState::ManifestExchange);
    let ctx = StreamContext {
        identity: &identity,
        cancel: &token,
        ui,
        timing: &timing,
    };

    match plan {
        Some(plan) => {
            or_cancel(&token, "manifest exchange", write_count(&mut stream, plan.len())).await??;
            transfer.enter(TransferState::PerFileLoop);
            let reports = send_all(&mut stream, &plan, &ctx).await?;
            if let Err(e) = stream.shutdown().await {
                warn!(error = %e, "could not shut down connection");
            }
            ui.output(&format!("{}\n", RULE));
            ui.output("Send complete, resetting WiFi and exiting.");
            Ok(reports)
        }
        None => {
            let Mode::Receiving(target) = &transfer.mode else {
                return Err(TransferError::NoFiles);
            };
            let target = target.clone();
            let count = or_cancel(&token, "manifest exchange", read_count(&mut stream)).await??;
            info!(files = count, "manifest received");
            transfer.enter(TransferState::PerFileLoop);
            let reports = receive_all(&mut stream, &target, count, &ctx).await?;
            ui.output(&format!("{}\n", RULE));
            ui.output("Reception complete, resetting WiFi and exiting.");
            Ok(reports)
        }
    }
}

async fn derive_identity(transfer: &Transfer) -> Result<SessionIdentity, TransferError> {
    let password = transfer.password.clone();
    let derived = tokio::select! {
        biased;
        _ = transfer.token.cancelled() => return Err(TransferError::Cancelled { during: "key derivation" }),
        derived = tokio::task::spawn_blocking(move || derive_session_identity(&password)) => derived,
    };
    let identity = derived.map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;
    Ok(identity)
}

async fn send_all(
    stream: &mut TcpStream,
    plan: &[SendEntry],
    ctx: &StreamContext<'_>,
) -> Result<Vec<FileReport>, TransferError> {
    let total = plan.len();
    let mut reports = Vec::with_capacity(total);
    for (i, entry) in plan.iter().enumerate() {
        if total > 1 {
            ctx.ui.output(RULE);
            ctx.ui.output(&format!(
                "Beginning transfer {} of {}. Filename: {}",
                i + 1,
                total,
                entry.wire_name
            ));
        }
        reports.push(send_file(stream, entry, ctx).await?);
    }
    Ok(reports)
}

async fn receive_all(
    stream: &mut TcpStream,
    target: &Path,
    count: u64,
    ctx: &StreamContext<'_>,
) -> Result<Vec<FileReport>, TransferError> {
    let mut reports = Vec::new();
    for i in 0..count {
        if count > 1 {
            ctx.ui.output(RULE);
            ctx.ui.output(&format!("Receiving file {} of {}.", i + 1, count));
        }
        reports.push(receive_file(stream, target, count, ctx).await?);
    }
    Ok(reports)
}
