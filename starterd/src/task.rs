use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::{fmt, mem};

use tracing::{error, warn};

/// Thread handle joined when dropped
///
/// The result of the thread can still be taken with [`Self::join`].
pub struct AutoJoinHandle<T = ()> {
    pub(crate) join_handle: Option<JoinHandle<T>>,
}

impl<T> AutoJoinHandle<T>
where
    T: Send + 'static,
{
    pub fn spawn<F>(name: &str, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let join_handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(f)
            .expect("Could not spawn a thread");
        Self::from(join_handle)
    }

    /// Wait for the thread and return its result
    ///
    /// Panics if the thread panicked.
    pub fn join(mut self) -> T {
        self.join_handle
            .take()
            .expect("Missing join handle")
            .join()
            .expect("Task thread panicked")
    }
}

impl AutoJoinHandle<()> {
    /// Spawn a thread whose error is only logged
    pub fn spawn_res<F, E>(name: &'static str, f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<(), E>,
        F: Send + 'static,
        E: Send + fmt::Display + 'static,
    {
        Self::spawn(name, move || {
            if let Err(e) = f() {
                error!(task = name, error = %e, "Task failed");
            }
        })
    }
}

impl<T> From<JoinHandle<T>> for AutoJoinHandle<T> {
    fn from(value: JoinHandle<T>) -> Self {
        Self {
            join_handle: Some(value),
        }
    }
}

impl<T> Drop for AutoJoinHandle<T> {
    fn drop(&mut self) {
        if let Some(join_handle) = mem::take(&mut self.join_handle) {
            if join_handle.join().is_err() {
                warn!("Task thread panicked");
            }
        }
    }
}

/// Raises the shutdown flag if dropped without calling [`Self::done`]
pub struct PanicGuard {
    name: &'static str,
    flag: Arc<AtomicBool>,
    done: bool,
}

impl PanicGuard {
    pub fn new(name: &'static str, flag: Arc<AtomicBool>) -> Self {
        Self {
            name,
            flag,
            done: false,
        }
    }

    pub fn done(mut self) {
        self.done = true;
    }
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if !self.done {
            error!(task = self.name, "Task panicked, shutting down");
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}
