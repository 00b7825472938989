//! Background-worker plumbing: named threads with a cancellation channel.
//!
//! A worker receives a [`StopSignal`] whose zero-capacity channel doubles as
//! its sleep timer: `recv_timeout` is simultaneously the tick and the
//! cancellation point, so a table being dropped wakes a sleeping worker
//! immediately instead of waiting out the tick. Dropping the
//! [`WorkerHandle`] disconnects the channel and joins the thread.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::fatal;

/// Cancellation token handed to a worker body.
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Sleeps up to `d`. Returns `false` if the worker should exit instead
    /// of continuing (the owning table is being destroyed).
    pub fn sleep(&self, d: Duration) -> bool {
        matches!(self.rx.recv_timeout(d), Err(RecvTimeoutError::Timeout))
    }

    /// Non-blocking cancellation check for tight loops.
    pub fn cancelled(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }
}

/// Owning handle to a background worker thread.
///
/// Drop order does the shutdown: the sender half disconnects, which makes
/// every pending and future `recv_timeout` return immediately, then the
/// thread is joined.
pub struct WorkerHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns a named worker thread running `body`.
    pub fn spawn<F>(name: &str, body: F) -> Self
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let (stop_tx, rx) = bounded(0);
        let thread = match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(StopSignal { rx }))
        {
            Ok(h) => h,
            Err(_) => fatal("worker thread creation failed"),
        };
        log::debug!("worker {name} started");
        WorkerHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(h) = self.thread.take() {
            let name = h.thread().name().unwrap_or("worker").to_string();
            if h.join().is_err() {
                log::error!("worker {name} panicked");
            } else {
                log::debug!("worker {name} stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn drop_cancels_a_sleeping_worker_promptly() {
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        let handle = WorkerHandle::spawn("test-sleeper", move |stop| {
            while stop.sleep(Duration::from_secs(60)) {
                t.fetch_add(1, Ordering::Relaxed);
            }
        });
        let start = Instant::now();
        drop(handle);
        // Join must not wait out the 60 s tick.
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(ticks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn cancelled_flips_after_drop_signal() {
        let (seen_tx, seen_rx) = bounded(1);
        let handle = WorkerHandle::spawn("test-poller", move |stop| {
            while !stop.cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            seen_tx.send(()).ok();
        });
        drop(handle);
        assert!(seen_rx.try_recv().is_ok());
    }

    #[test]
    fn sleep_times_out_when_not_cancelled() {
        let (tx, rx) = bounded(1);
        let handle = WorkerHandle::spawn("test-ticker", move |stop| {
            tx.send(stop.sleep(Duration::from_millis(5))).ok();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        drop(handle);
    }
}
