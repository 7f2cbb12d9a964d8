//! Async wrappers around a blocking [`Display`].
//!
//! Every library call runs on the blocking pool. Deadlines are enforced here:
//! when one expires the connection is closed, which releases the blocked
//! call.

use color_eyre::eyre::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use waylink::{DispatchOutcome, Display};

use crate::config::Config;

/// Connect to the configured display, or the environment's.
pub async fn connect(config: &Config) -> Result<Arc<Display>> {
    let name = config.display.clone();
    let display = tokio::task::spawn_blocking(move || match name.as_deref() {
        Some(name) => Display::connect(Some(name)),
        None => Display::connect_env(),
    })
    .await??;

    tracing::debug!("Connected to display server");
    Ok(Arc::new(display))
}

/// Run `op` on the blocking pool, closing the connection if it takes longer
/// than `timeout`.
pub async fn with_deadline<T, F>(display: &Arc<Display>, timeout: Duration, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Display) -> waylink::Result<T> + Send + 'static,
{
    let worker = Arc::clone(display);
    let task = tokio::task::spawn_blocking(move || op(&worker));

    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => Ok(joined??),
        Err(_) => {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Deadline expired, closing connection"
            );
            close(display).await?;
            bail!("server did not answer within {} ms", timeout.as_millis());
        }
    }
}

/// Dispatch events until the connection closes.
pub async fn pump(display: Arc<Display>) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        loop {
            if display.dispatch()? == DispatchOutcome::Closed {
                return Ok::<_, waylink::Error>(());
            }
        }
    })
    .await??;
    Ok(())
}

pub async fn close(display: &Arc<Display>) -> Result<()> {
    let display = Arc::clone(display);
    tokio::task::spawn_blocking(move || display.close()).await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
