//! Named background thread running a task at a fixed cadence.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub(crate) struct PeriodicTask {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub(crate) fn spawn<F>(name: &str, period: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    let now = Instant::now();
                    if now < next {
                        thread::park_timeout(next - now);
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    if Instant::now() < next {
                        // Spurious wakeup
                        continue;
                    }
                    next += period;

                    if panic::catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                        error!(task = %thread_name, "periodic task panicked");
                    }
                }
                debug!(task = %thread_name, "periodic task stopped");
            })?;

        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!(task = %self.name, "periodic task thread panicked");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
