//! Flying Carpet transfer core.
//!
//! Moves files between two hosts over one TCP connection on a freshly formed
//! link. Every chunk is sealed with a key both sides derive from a shared
//! password, so nothing about the key is ever exchanged.
//!
//! A host builds a [`Transfer`], supplies a [`Ui`] and a [`LinkProvisioner`],
//! and calls [`start_transfer`] (or [`start_transfer_blocking`]). Cancel the
//! session from anywhere through [`Transfer::token`].

pub mod connect;
pub mod error;
pub mod files;
pub mod link;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stream;
pub mod timing;
pub mod ui;

pub use error::TransferError;
pub use files::{SendEntry, format_time, make_size_readable, plan_send};
pub use link::{CommandLink, LinkError, LinkProvisioner, LinkTask, StaticLink};
pub use session::{
    DEFAULT_PORT, Mode, PeerOs, Transfer, TransferState, TransferSummary, start_transfer,
    start_transfer_blocking,
};
pub use stream::FileReport;
pub use timing::{DialPolicy, Timing};
pub use ui::{NullUi, TracingUi, Ui};
