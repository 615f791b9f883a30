//! Process lifecycle: signal handling and role lock release.
//!
//! | signal               | effect                                  |
//! |----------------------|-----------------------------------------|
//! | SIGINT/SIGTERM/QUIT  | cancel everything, release the role lock |
//! | SIGHUP               | reload configuration at the next tick    |
//! | SIGUSR1              | toggle debug logging at the next tick    |
//!
//! Nothing runs inside the signal context itself: the listeners only flip
//! flags or cancel the shared token.

use gateway::{ControlFlags, RoleLockHandle};
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the shutdown token and the role lock for the process
#[derive(Clone)]
pub struct LifecycleSupervisor {
    cancel: CancellationToken,
    flags: Arc<ControlFlags>,
    lock: Arc<Mutex<Option<RoleLockHandle>>>,
}

impl LifecycleSupervisor {
    pub fn new(cancel: CancellationToken, flags: Arc<ControlFlags>) -> Self {
        Self {
            cancel,
            flags,
            lock: Arc::new(Mutex::new(None)),
        }
    }

    /// Hold `handle` until shutdown
    pub fn with_lock(self, handle: RoleLockHandle) -> Self {
        if let Ok(mut slot) = self.lock.lock() {
            *slot = Some(handle);
        }
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn flags(&self) -> Arc<ControlFlags> {
        self.flags.clone()
    }

    /// Whether the role lock is still held
    pub fn holds_lock(&self) -> bool {
        self.lock
            .lock()
            .map(|slot| slot.as_ref().is_some_and(RoleLockHandle::is_held))
            .unwrap_or(false)
    }

    /// Cancel all tasks and release the role lock; safe to call repeatedly
    pub fn shutdown(&self) {
        self.cancel.cancel();
        match self.lock.lock() {
            Ok(mut slot) => {
                if let Some(mut handle) = slot.take() {
                    handle.release();
                }
            }
            Err(e) => warn!(error = %e, "Role lock slot poisoned"),
        }
    }

    /// Register the signal listeners and spawn the task serving them
    ///
    /// Registration happens before returning so a failure surfaces at
    /// startup instead of inside the task.
    pub fn install(&self) -> std::io::Result<JoinHandle<()>> {
        let listeners = Listeners {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            hangup: signal(SignalKind::hangup())?,
            debug: signal(SignalKind::user_defined1())?,
        };
        info!("Signal handlers installed");

        let supervisor = self.clone();
        Ok(tokio::spawn(async move { supervisor.serve(listeners).await }))
    }

    async fn serve(self, mut listeners: Listeners) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Supervisor stopping");
                    break;
                }
                _ = listeners.interrupt.recv() => {
                    info!(signal = "SIGINT", "Shutting down");
                    self.shutdown();
                    break;
                }
                _ = listeners.terminate.recv() => {
                    info!(signal = "SIGTERM", "Shutting down");
                    self.shutdown();
                    break;
                }
                _ = listeners.quit.recv() => {
                    info!(signal = "SIGQUIT", "Shutting down");
                    self.shutdown();
                    break;
                }
                _ = listeners.hangup.recv() => {
                    info!(signal = "SIGHUP", "Reload requested");
                    self.flags.request_reload();
                }
                _ = listeners.debug.recv() => {
                    info!(signal = "SIGUSR1", "Debug toggle requested");
                    self.flags.request_debug_toggle();
                }
            }
        }
    }
}

struct Listeners {
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
    hangup: Signal,
    debug: Signal,
}
