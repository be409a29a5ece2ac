use animatronic_control::config::{Settings, TransportMode};
use animatronic_control::service::ServiceEvent;
use animatronic_control::transport::{LocalTransport, RemoteTransport};
use animatronic_control::AppContext;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let settings = Settings::from_env().context("Failed to load settings")?;
    let transport = build_transport(settings.transport)?;

    info!("Animatronic control starting");
    info!("  Transport: {}", transport.name());
    for system in &settings.systems {
        info!(
            "  {} ({}) at {}:{}{}",
            system.id,
            system.name,
            system.host,
            system.port,
            if system.enabled { "" } else { " [disabled]" }
        );
    }

    let ctx = AppContext::init(settings, transport);

    let mut events = ctx.service.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Event log lagged, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Initial reachability sweep
    let reachable = ctx.service.test_connectivity().await;
    let up = reachable.values().filter(|ok| **ok).count();
    info!("{}/{} enabled systems reachable", up, reachable.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down...");

    ctx.shutdown().await;
    event_log.abort();

    Ok(())
}

fn build_transport(mode: TransportMode) -> Result<Arc<dyn RemoteTransport>> {
    match mode {
        TransportMode::Local => Ok(Arc::new(LocalTransport::new())),
        #[cfg(feature = "ssh")]
        TransportMode::Ssh => Ok(Arc::new(animatronic_control::transport::SshTransport::new())),
        #[cfg(not(feature = "ssh"))]
        TransportMode::Ssh => {
            anyhow::bail!("Settings request the ssh transport but this build lacks the `ssh` feature")
        }
    }
}

fn log_event(event: &ServiceEvent) {
    match event {
        ServiceEvent::AnimatronicConnected { system_id } => info!("{} connected", system_id),
        ServiceEvent::AnimatronicDisconnected { system_id } => warn!("{} disconnected", system_id),
        ServiceEvent::AnimatronicError { system_id, error: e } => {
            error!("{} connection error: {}", system_id, e)
        }
        ServiceEvent::AnimatronicHealthChanged {
            system_id,
            from,
            to,
        } => info!("{} health {} -> {}", system_id, from, to),
        ServiceEvent::CommandStarted(cmd) => {
            debug!("{} started `{}` ({})", cmd.animatronic_id, cmd.command, cmd.id)
        }
        ServiceEvent::CommandCompleted(cmd) => info!(
            "{} completed `{}` in {}ms",
            cmd.animatronic_id,
            cmd.command,
            cmd.execution_time.unwrap_or_default()
        ),
        ServiceEvent::CommandFailed(cmd) => warn!(
            "{} failed `{}`: {}",
            cmd.animatronic_id,
            cmd.command,
            cmd.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
