//! Shutdown coordination.
//!
//! A process-wide state machine `Running -> Draining -> Stopped`, driven by
//! OS termination signals or an explicit `shutdown()` call. Signal handlers
//! only publish a [`ShutdownEvent`]; the drain itself runs in ordinary task
//! context, so there is no re-entrancy on the handler path.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pipeline lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Accepting records.
    Running,
    /// Refusing new records; draining pending ones.
    Draining,
    /// Drain finished (completely or not).
    Stopped,
}

/// What initiated the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// An OS termination signal.
    Signal(&'static str),
    /// An explicit `shutdown()` call from the embedder.
    Requested,
}

impl std::fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Requested => write!(f, "explicit request"),
        }
    }
}

/// Coordinates the shutdown state machine.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the `Running` phase.
    #[must_use]
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self { phase_tx }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Whether draining has begun (or finished).
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    /// Subscribe to phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }

    /// Enter the `Draining` phase. Returns `true` for the first caller;
    /// later calls (a second signal, a concurrent `shutdown()`) are no-ops.
    pub fn begin_drain(&self, event: ShutdownEvent) -> bool {
        let mut first = false;
        self.phase_tx.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
                first = true;
                true
            } else {
                false
            }
        });
        if first {
            info!(%event, "Shutdown initiated; draining audit pipeline");
        }
        first
    }

    /// Enter the terminal `Stopped` phase.
    pub fn mark_stopped(&self) {
        self.phase_tx.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Stopped {
                false
            } else {
                *phase = ShutdownPhase::Stopped;
                true
            }
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Listen for process termination signals and flip the coordinator into
/// `Draining` when one arrives. The returned task runs until a signal fires
/// or the coordinator leaves `Running` by other means.
pub fn install_signal_handler(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    let mut phase_rx = coordinator.subscribe();
    tokio::spawn(async move {
        let event = tokio::select! {
            event = wait_for_signal() => event,
            // Someone else began the drain; nothing left to watch.
            _ = phase_rx.wait_for(|phase| *phase != ShutdownPhase::Running) => return,
        };
        if let Some(event) = event {
            coordinator.begin_drain(event);
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<ShutdownEvent> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            return None;
        },
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGINT handler");
            return None;
        },
    };

    tokio::select! {
        _ = sigterm.recv() => Some(ShutdownEvent::Signal("SIGTERM")),
        _ = sigint.recv() => Some(ShutdownEvent::Signal("SIGINT")),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<ShutdownEvent> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some(ShutdownEvent::Signal("ctrl-c")),
        Err(e) => {
            warn!(error = %e, "Failed to install ctrl-c handler");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begins_in_running() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.phase(), ShutdownPhase::Running);
        assert!(!coordinator.is_draining());
    }

    #[test]
    fn first_drain_wins() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.begin_drain(ShutdownEvent::Requested));
        assert!(!coordinator.begin_drain(ShutdownEvent::Signal("SIGTERM")));
        assert_eq!(coordinator.phase(), ShutdownPhase::Draining);
    }

    #[test]
    fn stopped_is_terminal() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.begin_drain(ShutdownEvent::Requested);
        coordinator.mark_stopped();
        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
        assert!(!coordinator.begin_drain(ShutdownEvent::Requested));
        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.begin_drain(ShutdownEvent::Requested);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ShutdownPhase::Draining);

        coordinator.mark_stopped();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn signal_task_exits_when_drain_begins_elsewhere() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let handle = install_signal_handler(Arc::clone(&coordinator));

        coordinator.begin_drain(ShutdownEvent::Requested);
        handle.await.unwrap();
    }
}
