//! The `post_to_ui` primitive.
//!
//! Backends, Spoolman callbacks and timers may run on any thread. None of
//! them touch subjects or backend state directly; they post a boxed task
//! through a [`UiHandle`], and the UI thread runs the queued tasks against
//! the [`AppContext`] it owns, in FIFO order.

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::error::AppError;
use crate::state::AppContext;

/// A unit of work executed on the UI thread.
pub type UiTask = Box<dyn FnOnce(&mut AppContext) + Send + 'static>;

/// Receiving end of the UI queue. Owned by the UI thread.
pub struct UiQueue {
    tx: UnboundedSender<UiTask>,
    rx: UnboundedReceiver<UiTask>,
}

/// Cloneable, thread-safe sending end of the UI queue.
#[derive(Clone)]
pub struct UiHandle {
    tx: UnboundedSender<UiTask>,
}

impl UiQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A new sending handle for this queue.
    pub fn handle(&self) -> UiHandle {
        UiHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every queued task, including tasks queued by tasks run during
    /// this call. Returns the number of tasks executed.
    pub fn drain(&mut self, ctx: &mut AppContext) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    task(ctx);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Await and run tasks until the queue is closed.
    ///
    /// The queue keeps one sender of its own, so in practice this only
    /// returns when the surrounding task is cancelled.
    pub async fn run(&mut self, ctx: &mut AppContext) {
        while let Some(task) = self.rx.recv().await {
            task(ctx);
        }
    }
}

impl Default for UiQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UiHandle {
    /// Queue `task` for the UI thread.
    ///
    /// Fails only when the [`UiQueue`] has been dropped; callers log and drop
    /// the update, the next full resync restores state.
    pub fn post<F>(&self, task: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut AppContext) + Send + 'static,
    {
        self.tx
            .send(Box::new(task))
            .map_err(|_| AppError::Io("ui queue closed".to_string()))
    }
}

impl std::fmt::Debug for UiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_runs_tasks_in_fifo_order() {
        let mut queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        let ui = queue.handle();

        ui.post(|ctx| ctx.runtime.wizard_active = true).expect("post");
        ui.post(|ctx| {
            assert!(ctx.runtime.wizard_active);
            ctx.runtime.wizard_active = false;
        })
        .expect("post");

        assert_eq!(queue.drain(&mut ctx), 2);
        assert!(!ctx.runtime.wizard_active);
    }

    #[test]
    fn tasks_posted_during_drain_run_in_same_drain() {
        let mut queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        let ui = queue.handle();

        ui.post(|ctx| {
            let again = ctx.ui.clone();
            again
                .post(|ctx| ctx.runtime.wizard_active = true)
                .expect("nested post");
        })
        .expect("post");

        assert_eq!(queue.drain(&mut ctx), 2);
        assert!(ctx.runtime.wizard_active);
    }

    #[test]
    fn drain_on_empty_queue_returns_zero() {
        let mut queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        assert_eq!(queue.drain(&mut ctx), 0);
    }

    #[test]
    fn post_from_another_thread_is_delivered() {
        let mut queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        let ui = queue.handle();

        std::thread::spawn(move || {
            ui.post(|ctx| ctx.runtime.wizard_active = true)
                .expect("post from thread");
        })
        .join()
        .expect("join");

        assert_eq!(queue.drain(&mut ctx), 1);
        assert!(ctx.runtime.wizard_active);
    }

    #[test]
    fn post_after_queue_dropped_fails() {
        let queue = UiQueue::new();
        let ui = queue.handle();
        drop(queue);
        assert!(ui.post(|_| {}).is_err());
    }
}
