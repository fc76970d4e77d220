mod cli;
mod terminal;

use std::io::IsTerminal;
use std::sync::Arc;

use carpet_transfer::{StaticLink, TracingUi, Transfer, Ui, start_transfer};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Cli;
use crate::terminal::TerminalUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carpet_transfer=info,flyingcarpet=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let password = match (&cli.password, cli.receive.is_some()) {
        (Some(password), _) => password.clone(),
        (None, true) => carpet_crypto::generate_password(),
        (None, false) => {
            anyhow::bail!("--password is required when sending; use the one the receiver shows")
        }
    };

    let mut transfer = Transfer::new(cli.mode(), cli.peer, password).with_port(cli.port);
    // Redirected output gets log lines instead of a redrawn progress bar.
    let ui: Arc<dyn Ui> = if std::io::stdout().is_terminal() {
        Arc::new(TerminalUi::new())
    } else {
        Arc::new(TracingUi)
    };

    let token = transfer.token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel_on_signal(&token);
    });

    let outcome = match cli.command_link() {
        Some(link) => start_transfer(&mut transfer, ui, &link).await,
        None => start_transfer(&mut transfer, ui, &StaticLink::new(cli.peer_ip)).await,
    };

    match outcome {
        Ok(summary) => {
            info!(
                files = summary.files.len(),
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "transfer finished"
            );
            Ok(())
        }
        // The UI has already shown the reason.
        Err(e) if e.is_cancelled() => std::process::exit(130),
        Err(_) => std::process::exit(1),
    }
}

fn cancel_on_signal(token: &CancellationToken) {
    if !token.is_cancelled() {
        info!("Stopping transfer...");
        token.cancel();
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C");
    }
}
