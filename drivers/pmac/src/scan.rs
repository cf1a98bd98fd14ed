// Licensed under the Apache-2.0 license

//! Background threads of a controller: the periodic DPRAM scans and the
//! mailbox worker.

use crate::error::DriverError;
use crate::queue::MailboxQueue;
use log::{debug, info};
use pmac_common::MailboxTransport;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Whether a periodic loop sleeps before or after each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    DelayFirst,
    ReadFirst,
}

/// A running background thread.
pub struct Task {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the thread and waits for it. A mailbox worker must have been
    /// told to stop through its queue first.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} panicked", self.name);
            }
        }
        debug!("{} stopped", self.name);
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(name: String, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>, DriverError> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| DriverError::Spawn(name, e.to_string()))
}

/// Runs `pass` every `period` until the task is stopped.
pub fn spawn_periodic<F>(
    name: String,
    period: Duration,
    order: ScanOrder,
    pass: F,
) -> Result<Task, DriverError>
where
    F: Fn() + Send + 'static,
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let thread_name = name.clone();
    let handle = spawn(name.clone(), move || {
        info!("{} running, period {:?}", thread_name, period);
        loop {
            if order == ScanOrder::ReadFirst {
                pass();
            }
            match stop_rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            if order == ScanOrder::DelayFirst {
                pass();
            }
        }
    })?;
    Ok(Task {
        name,
        stop: Some(stop_tx),
        handle: Some(handle),
    })
}

/// Drains `queue` through `transport` whenever requests arrive, until the
/// queue is shut down.
pub fn spawn_mailbox_worker(
    name: String,
    queue: Arc<MailboxQueue>,
    transport: Arc<dyn MailboxTransport>,
) -> Result<Task, DriverError> {
    let thread_name = name.clone();
    let handle = spawn(name.clone(), move || {
        info!("{} running", thread_name);
        while queue.is_running() {
            if queue.wait(None) && queue.is_running() {
                queue.process_pending(transport.as_ref());
            }
        }
    })?;
    Ok(Task {
        name,
        stop: None,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_periodic_runs_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut task = spawn_periodic(
            "pmacTest0".into(),
            Duration::from_millis(5),
            ScanOrder::ReadFirst,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.stop();
        let after = count.load(Ordering::SeqCst);
        assert!(after >= 3);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_delay_first_waits_a_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut task = spawn_periodic(
            "pmacTest1".into(),
            Duration::from_secs(10),
            ScanOrder::DelayFirst,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        task.stop();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
