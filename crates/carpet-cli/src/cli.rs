use std::net::IpAddr;
use std::path::PathBuf;

use carpet_transfer::{CommandLink, DEFAULT_PORT, Mode, PeerOs};
use clap::Parser;

/// Encrypted file transfer between two computers, no router required.
#[derive(Debug, Parser)]
#[command(name = "flyingcarpet", version)]
pub struct Cli {
    /// Files or folders to send
    #[arg(long, num_args = 1.., value_name = "PATH", conflicts_with = "receive", required_unless_present = "receive")]
    pub send: Vec<PathBuf>,

    /// Folder to receive into
    #[arg(long, value_name = "PATH")]
    pub receive: Option<PathBuf>,

    /// Operating system of the other device
    #[arg(long, env = "CARPET_PEER", value_name = "linux|mac|windows|android|ios")]
    pub peer: PeerOs,

    #[arg(long, env = "CARPET_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Shared transfer password. Generated when receiving if omitted.
    #[arg(long, env = "CARPET_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Address of the receiving device, when both are already on one network
    #[arg(long, env = "CARPET_PEER_IP")]
    pub peer_ip: Option<IpAddr>,

    /// Command that joins the link; may print the peer IP on its last line
    #[arg(long, env = "CARPET_LINK_CONNECT")]
    pub link_connect: Option<String>,

    /// Long-running command that hosts the link until the transfer ends
    #[arg(long, env = "CARPET_LINK_HOST")]
    pub link_host: Option<String>,

    /// Command that restores the network afterwards
    #[arg(long, env = "CARPET_LINK_RESET")]
    pub link_reset: Option<String>,

    /// Command that removes the saved network (asks first)
    #[arg(long, env = "CARPET_LINK_FORGET")]
    pub link_forget: Option<String>,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        match &self.receive {
            Some(target) => Mode::Receiving(target.clone()),
            None => Mode::Sending(self.send.clone()),
        }
    }

    /// `Some` when any link command is configured.
    pub fn command_link(&self) -> Option<CommandLink> {
        if self.link_connect.is_none()
            && self.link_host.is_none()
            && self.link_reset.is_none()
            && self.link_forget.is_none()
        {
            return None;
        }
        Some(CommandLink {
            connect: self.link_connect.clone(),
            host: self.link_host.clone(),
            reset: self.link_reset.clone(),
            forget: self.link_forget.clone(),
            peer_ip: self.peer_ip,
        })
    }
}
