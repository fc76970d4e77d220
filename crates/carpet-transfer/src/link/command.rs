use std::net::IpAddr;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::{LinkTask, StopOutcome};
use super::{LinkError, LinkProvisioner};
use crate::session::Transfer;
use crate::ui::Ui;

/// Link adapter driven by operator-supplied shell commands.
///
/// Templates may use `{ssid}`, `{password}`, `{port}` and `{peer}`; values are
/// shell-quoted when substituted. Success is judged only by exit status.
///
/// * `host` is started before `connect` and kept running until reset, e.g. a
///   hotspot or ad-hoc network daemon.
/// * `connect` runs to completion. When sending without a configured
///   `peer_ip`, the last non-empty line of its stdout is taken as the peer's
///   address.
/// * `reset` runs during teardown.
/// * `forget` also runs during teardown, but only if the user agrees when
///   asked through [`Ui::show_password_prompt`].
#[derive(Debug, Clone, Default)]
pub struct CommandLink {
    pub connect: Option<String>,
    pub host: Option<String>,
    pub reset: Option<String>,
    pub forget: Option<String>,
    pub peer_ip: Option<IpAddr>,
}

impl LinkProvisioner for CommandLink {
    async fn connect_to_peer(&self, transfer: &mut Transfer, ui: &dyn Ui) -> Result<(), LinkError> {
        if let Some(host) = &self.host {
            let task = LinkTask::spawn(host.clone(), shell(&render(host, transfer)))?;
            ui.output(&format!("SSID {} started.", transfer.ssid().unwrap_or_default()));
            transfer.link_task = Some(task);
        }

        let mut stdout = String::new();
        if let Some(connect) = &self.connect {
            if let Some(ssid) = transfer.ssid() {
                ui.output(&format!("Looking for network {}...", ssid));
            }
            stdout = run_to_completion(connect, &render(connect, transfer), &transfer.token).await?;
        }

        if transfer.is_sending() {
            let ip = match self.peer_ip {
                Some(ip) => ip,
                None => parse_peer_ip(&stdout)?,
            };
            transfer.recipient_ip = Some(ip);
            ui.output(&format!("Peer IP found: {}", ip));
        }
        Ok(())
    }

    async fn reset_wifi(&self, transfer: &mut Transfer, ui: &dyn Ui) {
        if let Some(task) = transfer.link_task.take() {
            let label = task.label().to_string();
            match task.stop().await {
                StopOutcome::Stopped | StopOutcome::Exited(_) => {
                    ui.output("Stopping hosted network.");
                }
                StopOutcome::Failed(reason) => {
                    warn!(task = %label, %reason, "could not stop link task");
                    ui.output(&format!("Could not stop `{}`: {}", label, reason));
                }
            }
        }

        // Teardown must finish even if the session was canceled, so these
        // commands get a token of their own.
        let teardown = CancellationToken::new();

        if let Some(reset) = &self.reset {
            if let Err(e) = run_to_completion(reset, &render(reset, transfer), &teardown).await {
                warn!(error = %e, "link reset failed");
                ui.output(&e.to_string());
            }
        }

        if let Some(forget) = &self.forget {
            if ui.show_password_prompt() {
                if let Err(e) = run_to_completion(forget, &render(forget, transfer), &teardown).await {
                    warn!(error = %e, "could not forget network");
                    ui.output(&format!(
                        "Error removing {} from preferred wireless networks list.",
                        transfer.ssid().unwrap_or_default()
                    ));
                }
            } else {
                debug!("user declined to forget the network");
            }
        }
    }
}

/// Substitute placeholders into a command template.
pub(crate) fn render(template: &str, transfer: &Transfer) -> String {
    template
        .replace("{ssid}", &quote(transfer.ssid().unwrap_or_default()))
        .replace("{password}", &quote(&transfer.password))
        .replace("{port}", &transfer.port.to_string())
        .replace("{peer}", &transfer.peer.to_string())
}

#[cfg(not(windows))]
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(windows)]
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(not(windows))]
fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[cfg(windows)]
fn shell(script: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(script);
    command
}

/// Run one command, returning its stdout. `label` is the template and is the
/// only form of the command that appears in errors.
async fn run_to_completion(
    label: &str,
    script: &str,
    cancel: &CancellationToken,
) -> Result<String, LinkError> {
    let child = shell(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| LinkError::Spawn {
            command: label.to_string(),
            source,
        })?;

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LinkError::Cancelled),
        output = child.wait_with_output() => output.map_err(|source| LinkError::Spawn {
            command: label.to_string(),
            source,
        })?,
    };

    if !output.status.success() {
        debug!(
            command = label,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "link command failed"
        );
        return Err(LinkError::CommandFailed {
            command: label.to_string(),
            status: output.status,
        });
    }

    info!(command = label, "link command finished");
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_peer_ip(stdout: &str) -> Result<IpAddr, LinkError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| LinkError::PeerAddress("no peer IP configured or reported".into()))?;
    line.parse()
        .map_err(|_| LinkError::PeerAddress(format!("{:?} is not an IP address", line)))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    use carpet_crypto::SessionIdentity;

    use super::*;
    use crate::session::{Mode, PeerOs};
    use crate::ui::NullUi;

    fn sending() -> Transfer {
        let mut transfer = Transfer::new(
            Mode::Sending(vec![PathBuf::from("a.txt")]),
            PeerOs::Linux,
            "it's",
        );
        transfer.identity = Some(SessionIdentity {
            ssid: "flyingCarpet_1234".into(),
            key: [0u8; 32],
        });
        transfer
    }

    #[test]
    fn peer_ip_from_last_line() {
        assert_eq!(
            parse_peer_ip("joining...\n10.42.0.1\n\n").unwrap(),
            IpAddr::V4(Ipv4Addr::new(10, 42, 0, 1))
        );
        assert!(parse_peer_ip("").is_err());
        assert!(parse_peer_ip("done\n").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn placeholders_are_quoted() {
        let transfer = sending();
        assert_eq!(
            render("join {ssid} {password} {port} {peer}", &transfer),
            r"join 'flyingCarpet_1234' 'it'\''s' 3290 linux"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_reads_peer_ip_from_stdout() {
        let link = CommandLink {
            connect: Some("echo joined; echo 10.42.0.1".into()),
            ..CommandLink::default()
        };
        let mut transfer = sending();
        link.connect_to_peer(&mut transfer, &NullUi).await.unwrap();
        assert_eq!(transfer.recipient_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 42, 0, 1))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_is_judged_by_exit_status() {
        let link = CommandLink {
            connect: Some("echo all good; exit 3".into()),
            ..CommandLink::default()
        };
        let mut transfer = sending();
        let err = link.connect_to_peer(&mut transfer, &NullUi).await.unwrap_err();
        match err {
            LinkError::CommandFailed { command, status } => {
                assert_eq!(command, "echo all good; exit 3");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn canceled_connect_stops_the_command() {
        let link = CommandLink {
            connect: Some("sleep 30".into()),
            ..CommandLink::default()
        };
        let mut transfer = sending();
        transfer.token.cancel();
        let err = link.connect_to_peer(&mut transfer, &NullUi).await.unwrap_err();
        assert!(matches!(err, LinkError::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn host_task_lives_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reset-ran");
        let link = CommandLink {
            host: Some("sleep 30".into()),
            reset: Some(format!("touch {}", marker.display())),
            peer_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..CommandLink::default()
        };
        let mut transfer = sending();
        link.connect_to_peer(&mut transfer, &NullUi).await.unwrap();
        assert!(transfer.link_task.as_ref().is_some_and(|t| !t.is_finished()));

        transfer.token.cancel();
        link.reset_wifi(&mut transfer, &NullUi).await;
        assert!(transfer.link_task.is_none());
        assert!(marker.exists());
    }
}
