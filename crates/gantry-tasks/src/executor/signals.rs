//! Cancellation on SIGINT/SIGTERM

use tokio::sync::watch;
use tracing::warn;

#[cfg(unix)]
const SIGINT: i32 = libc::SIGINT;
#[cfg(not(unix))]
const SIGINT: i32 = 2;

/// Spawn a listener for interrupt and terminate signals.
///
/// The returned receiver holds `None` until a signal arrives, then the
/// signal number. Must be called inside a tokio runtime.
pub fn cancel_on_signals() -> watch::Receiver<Option<i32>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        warn!(signal, "received signal, stopping running tasks");
        let _ = tx.send(Some(signal));
        // keep the channel open so receivers never see it close
        tx.closed().await;
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        signal = wait_for_ctrl_c() => signal,
        _ = terminate.recv() => libc::SIGTERM,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> i32 {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> i32 {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
    SIGINT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_uncancelled() {
        let rx = cancel_on_signals();
        assert!(rx.borrow().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_sets_signal() {
        use std::time::Duration;

        let mut rx = cancel_on_signals();
        // let the listener install its handlers before raising
        tokio::time::sleep(Duration::from_millis(100)).await;
        // SAFETY: raise has no memory-safety preconditions
        unsafe {
            libc::raise(libc::SIGTERM);
        }

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), Some(libc::SIGTERM));
    }
}
