//! adhders client - headless entry point
//!
//! Restores the stored session, keeps the live channel running and logs
//! everything it receives until interrupted.

use adhders_client::{App, ClientConfig};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adhders_client=debug")),
        )
        .init();

    let config = ClientConfig::from_env().context("failed to load configuration")?;
    let mut app = App::new(config).context("failed to build client")?;

    let mut events = app.live.subscribe();
    let mut notices = app.notifier.subscribe();

    let session = app.start().await;
    match session.user.as_ref() {
        Some(user) if session.authenticated => tracing::info!("signed in as {}", user.name),
        _ => tracing::info!("not signed in; live updates stay off until login"),
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => tracing::info!(
                    "live event {}: {}",
                    event.event_type().unwrap_or("<untyped>"),
                    event.payload
                ),
                Err(e) => tracing::warn!("live event stream: {}", e),
            },
            notice = notices.recv() => {
                if let Err(e) = notice {
                    tracing::warn!("notice stream: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    app.shutdown();
    Ok(())
}
