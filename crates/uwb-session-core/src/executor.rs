//! Executors on which application callbacks run.
//!
//! Callbacks are never run inline on the thread that delivers a remote
//! event. Each session carries the executor its application supplied.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::mpsc,
    thread,
};

use tokio::runtime::Handle;

/// Unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling context for application callbacks.
pub trait CallbackExecutor: Send + Sync {
    /// Schedule `task`. Must not run it on the calling thread.
    fn execute(&self, task: Task);
}

/// Serial executor backed by one dedicated OS thread.
///
/// Tasks run in submission order. A panicking task is logged and does
/// not take the thread down.
pub struct ThreadExecutor {
    sender: mpsc::Sender<Task>,
    name: String,
}

impl ThreadExecutor {
    /// Spawn the worker thread.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Task>();
        let thread_name = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(task) = receiver.recv() {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(executor = %thread_name, "Callback panicked");
                }
            }
            tracing::trace!(executor = %thread_name, "Executor thread exiting");
        })?;
        Ok(Self { sender, name })
    }

    /// Name of the worker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CallbackExecutor for ThreadExecutor {
    fn execute(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::warn!(executor = %self.name, "Executor thread gone, dropping callback");
        }
    }
}

/// Pooled executor running each task on the tokio blocking pool.
///
/// No ordering between tasks.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor on the runtime of the calling context.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl CallbackExecutor for TokioExecutor {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}
