//! Two-stage shutdown signal.
//!
//! The first SIGINT/SIGTERM requests a stop: the engine finishes the
//! current supervision iteration, gracefully shuts the worker down, and
//! preserves its work. A second signal forces the issue: anything still
//! running (including the cleanup child) is SIGKILLed.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared stop/force tokens, cloneable across the engine.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    stop: CancellationToken,
    force: CancellationToken,
}

impl ShutdownSignal {
    /// Tokens without an installed handler; tests and callers that manage
    /// signals themselves trigger the stages directly.
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }

    /// Install the process-wide signal listener. Idempotent per process
    /// only in the sense that each call spawns its own listener; install
    /// once, clone everywhere.
    #[cfg(unix)]
    pub fn install() -> anyhow::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let this = Self::new();
        let stop = this.stop.clone();
        let force = this.force.clone();

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
            info!("stop requested, finishing up (press Ctrl-C again to force)");
            stop.cancel();

            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
            warn!("second signal received, escalating to SIGKILL");
            force.cancel();
        });

        Ok(this)
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn request_force(&self) {
        self.force.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn force_token(&self) -> &CancellationToken {
        &self.force
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_independent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.stop_requested());
        signal.request_stop();
        assert!(signal.stop_requested());
        assert!(!signal.force_token().is_cancelled());
        signal.request_force();
        assert!(signal.force_token().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();
        signal.request_stop();
        assert!(other.stop_requested());
    }
}
