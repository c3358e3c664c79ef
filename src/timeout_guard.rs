//! One-shot operation timeouts.
//!
//! A guard is armed with [`OperationTimeoutGuard::begin`] when a long
//! operation is started and disarmed with [`OperationTimeoutGuard::end`] from
//! its completion callback. If the completion does not arrive in time the
//! timeout callback runs on the UI thread instead. Every `begin` starts a
//! new generation; a timer belonging to an older generation never fires its
//! callback, even if it was already queued on the UI thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::AppContext;
use crate::subject::IntSubject;
use crate::ui_queue::UiHandle;

#[derive(Default)]
struct Shared {
    active: AtomicBool,
    generation: AtomicU64,
}

pub struct OperationTimeoutGuard {
    name: String,
    shared: Arc<Shared>,
    in_progress: Option<IntSubject>,
    timer: Option<JoinHandle<()>>,
}

impl OperationTimeoutGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::default()),
            in_progress: None,
            timer: None,
        }
    }

    /// Mirror the guard's state into `subject` (1 while armed, 0 otherwise).
    pub fn with_in_progress(mut self, subject: IntSubject) -> Self {
        self.in_progress = Some(subject);
        self
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Arm the guard, replacing any pending timer.
    ///
    /// Needs a Tokio runtime for the timer; without one the guard is still
    /// marked active but never fires.
    pub fn begin<F>(&mut self, timeout: Duration, on_timeout: F, ui: &UiHandle)
    where
        F: FnOnce(&mut AppContext) + Send + 'static,
    {
        self.cancel_timer();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.active.store(true, Ordering::SeqCst);
        if let Some(subject) = &self.in_progress {
            subject.set(1);
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(guard = %self.name, "no async runtime; operation timeout disabled");
                return;
            }
        };

        debug!(guard = %self.name, ?timeout, generation, "operation timeout armed");
        let shared = Arc::clone(&self.shared);
        let subject = self.in_progress.clone();
        let name = self.name.clone();
        let ui = ui.clone();
        self.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let posted = ui.post(move |ctx| {
                if shared.generation.load(Ordering::SeqCst) != generation
                    || !shared.active.swap(false, Ordering::SeqCst)
                {
                    debug!(guard = %name, generation, "stale operation timeout ignored");
                    return;
                }
                if let Some(subject) = &subject {
                    subject.set(0);
                }
                warn!(guard = %name, ?timeout, "operation timed out");
                on_timeout(ctx);
            });
            if let Err(e) = posted {
                warn!(error = %e, "dropping operation timeout");
            }
        }));
    }

    /// Disarm the guard. Safe to call at any time, any number of times.
    pub fn end(&mut self) {
        self.cancel_timer();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(subject) = &self.in_progress {
            subject.set(0);
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for OperationTimeoutGuard {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

impl std::fmt::Debug for OperationTimeoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTimeoutGuard")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}
