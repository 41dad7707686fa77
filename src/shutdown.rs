//! Signal handling for the command-line shell.
//!
//! The first SIGINT, SIGTERM or SIGHUP runs the supplied cancel hook so the
//! running operation can unwind; a second one exits with status 130.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Exit status used when a second signal forces the process down.
pub const FORCE_EXIT_CODE: i32 = 130;

#[cfg(unix)]
async fn next_signal(
    sigterm: &mut Option<tokio::signal::unix::Signal>,
    sighup: &mut Option<tokio::signal::unix::Signal>,
) {
    async fn recv(sig: &mut Option<tokio::signal::unix::Signal>) {
        match sig {
            Some(sig) => {
                sig.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = recv(sigterm) => {}
        _ = recv(sighup) => {}
    }
}

#[cfg(unix)]
fn register(
    kind: tokio::signal::unix::SignalKind,
    name: &str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(sig) => Some(sig),
        Err(e) => {
            tracing::warn!("Could not listen for {}: {}", name, e);
            None
        }
    }
}

/// Spawn the listener. `on_signal` runs once, on the first signal.
pub fn install_signal_handler<F>(on_signal: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let count = Arc::new(AtomicU32::new(0));

    tokio::spawn(async move {
        #[cfg(unix)]
        let (mut sigterm, mut sighup) = {
            use tokio::signal::unix::SignalKind;
            (
                register(SignalKind::terminate(), "SIGTERM"),
                register(SignalKind::hangup(), "SIGHUP"),
            )
        };

        loop {
            #[cfg(unix)]
            {
                next_signal(&mut sigterm, &mut sighup).await;
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Could not listen for Ctrl+C: {}", e);
                    return;
                }
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Received shutdown signal, cancelling...");
                tracing::info!("Press Ctrl+C again to force exit");
                on_signal();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    })
}
