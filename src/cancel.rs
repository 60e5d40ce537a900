//! Cooperative cancellation.
//!
//! Signals are never handled inline: a background listener only trips a
//! [`CancelToken`], and the search checks the token between external calls.

use crate::error::{AlignError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("cancellation requested, stopping after the current step");
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AlignError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token has been tripped.
    pub async fn cancelled(&self) {
        loop {
            // registered before the flag is read, so a concurrent cancel wakes it
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Trip this token on SIGINT or SIGTERM.
    ///
    /// Returns once the handlers are registered, so a signal sent afterwards
    /// is guaranteed to be observed.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let token = self.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<std::io::Result<()>>();

        thread::Builder::new()
            .name("signal-listener".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(listen(token, ready_tx));
            })?;

        ready_rx
            .recv()
            .map_err(|_| std::io::Error::other("signal listener exited before registering"))??;
        Ok(())
    }
}

#[cfg(unix)]
async fn listen(token: CancelToken, ready: mpsc::Sender<std::io::Result<()>>) {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = signal(SignalKind::terminate())
        .and_then(|term| signal(SignalKind::interrupt()).map(|int| (term, int)));
    let (mut term, mut int) = match streams {
        Ok(streams) => {
            let _ = ready.send(Ok(()));
            streams
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    };
    tracing::warn!(signal = name, "got kill signal");
    token.cancel();
}

#[cfg(not(unix))]
async fn listen(token: CancelToken, ready: mpsc::Sender<std::io::Result<()>>) {
    let _ = ready.send(Ok(()));
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!(signal = "ctrl-c", "got kill signal");
        token.cancel();
    }
}
