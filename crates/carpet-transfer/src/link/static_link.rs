use std::net::IpAddr;

use tracing::info;

use super::{LinkError, LinkProvisioner};
use crate::session::Transfer;
use crate::ui::Ui;

/// Both hosts are already on the same network. Nothing is set up or torn
/// down; the sender just needs to know where the receiver is.
#[derive(Debug, Clone, Default)]
pub struct StaticLink {
    pub peer_ip: Option<IpAddr>,
}

impl StaticLink {
    pub fn new(peer_ip: Option<IpAddr>) -> Self {
        StaticLink { peer_ip }
    }
}

impl LinkProvisioner for StaticLink {
    async fn connect_to_peer(&self, transfer: &mut Transfer, ui: &dyn Ui) -> Result<(), LinkError> {
        if !transfer.is_sending() {
            ui.output("Using the current network.");
            return Ok(());
        }

        let ip = self
            .peer_ip
            .or(transfer.recipient_ip)
            .ok_or_else(|| LinkError::PeerAddress("no peer IP was configured".into()))?;
        transfer.recipient_ip = Some(ip);
        info!(%ip, "using configured peer address");
        ui.output(&format!("Using the current network, peer at {}.", ip));
        Ok(())
    }

    async fn reset_wifi(&self, _transfer: &mut Transfer, _ui: &dyn Ui) {}
}
