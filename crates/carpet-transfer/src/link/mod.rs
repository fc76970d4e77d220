//! Link provisioning: getting both hosts onto a shared network before the
//! TCP phase, and putting the network back afterwards.
//!
//! The session calls [`LinkProvisioner::connect_to_peer`] once before it
//! opens the TCP connection and [`LinkProvisioner::reset_wifi`] exactly once
//! during teardown. The host program picks an adapter at startup.

mod command;
mod static_link;
mod task;

use std::future::Future;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

pub use command::CommandLink;
pub use static_link::StaticLink;
pub use task::{LinkTask, StopOutcome};

use crate::session::Transfer;
use crate::ui::Ui;

#[derive(Debug, Error)]
pub enum LinkError {
    /// `command` is the unexpanded template, so secrets never reach logs.
    #[error("`{command}` failed with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("link setup was canceled")]
    Cancelled,

    #[error("could not determine peer address: {0}")]
    PeerAddress(String),
}

pub trait LinkProvisioner: Send + Sync {
    /// Join or host the shared link. On the sending side this must leave the
    /// peer's address in `transfer.recipient_ip`.
    fn connect_to_peer(
        &self,
        transfer: &mut Transfer,
        ui: &dyn Ui,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Best-effort cleanup. Failures are reported to the UI and logged.
    fn reset_wifi(&self, transfer: &mut Transfer, ui: &dyn Ui) -> impl Future<Output = ()> + Send;
}
