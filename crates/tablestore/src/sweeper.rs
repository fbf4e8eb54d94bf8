//! Periodic background expiry sweep.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

/// A stop flag that also wakes sleepers.
///
/// [`ShutdownSignal::wait_timeout`] returns as soon as the signal fires rather
/// than sleeping out the whole period.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal and wakes every waiter.
    pub fn shutdown(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for at most `duration`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut stopped = flag.lock();
        if !*stopped {
            cvar.wait_for(&mut stopped, duration);
        }
        *stopped
    }
}

/// A named thread that runs a sweep every `period` until stopped.
///
/// A failed sweep is logged and retried on the next tick.
pub struct Sweeper {
    name: String,
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns the sweep thread. The first sweep runs one `period` after start.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to spawn the thread.
    pub fn start<F>(name: &str, period: Duration, mut sweep: F) -> io::Result<Self>
    where
        F: FnMut() -> kvstore::Result<usize> + Send + 'static,
    {
        let signal = ShutdownSignal::new();
        let thread_signal = signal.clone();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!(sweeper = %thread_name, period_ms = period.as_millis() as u64, "sweeper started");
                while !thread_signal.wait_timeout(period) {
                    match sweep() {
                        Ok(0) => {}
                        Ok(expired) => debug!(sweeper = %thread_name, expired, "swept expired keys"),
                        Err(e) => error!(sweeper = %thread_name, error = %e, "expiry sweep failed"),
                    }
                }
                info!(sweeper = %thread_name, "sweeper stopped");
            })?;

        Ok(Self {
            name: name.to_string(),
            signal,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the thread and waits for it to exit. An in-flight sweep runs
    /// to completion first; no sweep starts afterwards.
    pub fn stop(&mut self) {
        self.signal.shutdown();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                error!(sweeper = %self.name, "sweeper thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
