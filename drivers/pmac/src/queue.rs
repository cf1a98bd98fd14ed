// Licensed under the Apache-2.0 license

use crate::pmac_error::error_text;
use crate::sync::Semaphore;
use chrono::Local;
use log::{debug, error, info};
use pmac_common::consts::MBX_QUEUE_SIZE;
use pmac_common::{MailboxTransport, Terminator};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Caller side of a mailbox request. A requester has at most one request
/// outstanding; it raises its busy flag before submitting and the queue
/// either completes the request or clears the flag.
pub trait Requester: Send + Sync {
    fn name(&self) -> &str;

    /// Called instead of `complete` when the request was dropped or failed.
    fn clear_busy(&self);

    /// Called from the worker thread with the filled-in request.
    fn complete(&self, request: MailboxRequest);
}

/// Receiver of formatted error lines for BELL responses.
pub trait ErrorSink: Send + Sync {
    fn publish(&self, line: &str);
}

/// One command/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxRequest {
    pub card: usize,
    pub command: String,
    pub response: String,
    pub error_message: String,
    pub terminator: Option<Terminator>,
}

impl MailboxRequest {
    pub fn new(card: usize, command: impl Into<String>) -> Self {
        Self {
            card,
            command: command.into(),
            response: String::new(),
            error_message: String::new(),
            terminator: None,
        }
    }
}

struct Pending {
    requester: Arc<dyn Requester>,
    request: MailboxRequest,
}

/// Bounded FIFO of mailbox requests for one controller, drained by a
/// single worker.
pub struct MailboxQueue {
    card: usize,
    capacity: usize,
    ring: Mutex<VecDeque<Pending>>,
    ready: Semaphore,
    running: AtomicBool,
    error_sink: Mutex<Option<Arc<dyn ErrorSink>>>,
}

impl MailboxQueue {
    pub fn new(card: usize) -> Self {
        Self::with_capacity(card, MBX_QUEUE_SIZE)
    }

    pub fn with_capacity(card: usize, capacity: usize) -> Self {
        Self {
            card,
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Semaphore::counting(),
            running: AtomicBool::new(true),
            error_sink: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_error_sink(&self, sink: Option<Arc<dyn ErrorSink>>) {
        *self.error_sink.lock().unwrap() = sink;
    }

    /// Queues `command` for `requester`. On overflow the request is dropped
    /// and the requester's busy flag cleared; returns whether it was queued.
    pub fn submit(&self, requester: Arc<dyn Requester>, command: impl Into<String>) -> bool {
        let request = MailboxRequest::new(self.card, command);
        let mut ring = self.ring.lock().unwrap();
        if ring.len() >= self.capacity {
            drop(ring);
            error!(
                "PMAC MBX ring buffer put overflow, controller: {}, PV={}",
                self.card,
                requester.name()
            );
            requester.clear_busy();
            return false;
        }
        ring.push_back(Pending { requester, request });
        drop(ring);
        self.ready.give();
        true
    }

    /// Waits until work may be pending. Returns false on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.ready.take(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Lets a worker run again after `shutdown`.
    pub fn resume(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    /// Stops the worker loop after its current transaction.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.ready.give();
    }

    /// Pops and runs queued requests until the ring is empty. The ring lock
    /// is released while each transaction runs.
    pub fn process_pending(&self, transport: &dyn MailboxTransport) -> usize {
        let mut done = 0;
        loop {
            let next = self.ring.lock().unwrap().pop_front();
            let Some(pending) = next else {
                return done;
            };
            self.run(transport, pending);
            done += 1;
        }
    }

    fn run(&self, transport: &dyn MailboxTransport, pending: Pending) {
        let Pending {
            requester,
            mut request,
        } = pending;
        debug!(
            "PMAC MBX card={} command=[{}]",
            request.card, request.command
        );
        let reply = match transport.write_read(&request.command) {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    "PMAC MBX transaction failed, controller: {}, PV={} CMD={}: {}",
                    self.card,
                    requester.name(),
                    request.command,
                    e
                );
                requester.clear_busy();
                return;
            }
        };
        request.response = reply.response;
        request.error_message = reply.error_message;
        request.terminator = Some(reply.terminator);

        if reply.terminator == Terminator::Bell {
            requester.clear_busy();
            let sink = self.error_sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                sink.publish(&format_error_line(requester.name(), &request));
            } else {
                info!(
                    "PMAC MBX error {} for PV={} CMD={}",
                    request.error_message,
                    requester.name(),
                    request.command
                );
            }
        } else {
            debug!("PMAC MBX response=[{}]", request.response);
            requester.complete(request);
        }
    }
}

/// `<time> PV=<name> CMD=<command> <ERRnnn> <description>` with the time
/// as `%m/%d/%y %H:%M:%S` local time.
pub fn format_error_line(name: &str, request: &MailboxRequest) -> String {
    let time = Local::now().format("%m/%d/%y %H:%M:%S").to_string();
    format!(
        "{:17.17} PV={} CMD={} {} {}",
        time,
        name,
        request.command,
        request.error_message,
        error_text(&request.error_message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmac_common::{Reply, TransportError};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        busy_cleared: AtomicUsize,
        completed: Mutex<Vec<MailboxRequest>>,
    }

    impl Requester for Recorder {
        fn name(&self) -> &str {
            "TEST:REC"
        }
        fn clear_busy(&self) {
            self.busy_cleared.fetch_add(1, Ordering::SeqCst);
        }
        fn complete(&self, request: MailboxRequest) {
            self.completed.lock().unwrap().push(request);
        }
    }

    struct Scripted;

    impl MailboxTransport for Scripted {
        fn write_read(&self, command: &str) -> Result<Reply, TransportError> {
            match command {
                "BAD" => Ok(Reply::error("ERR003")),
                "DEAD" => Err(TransportError::Timeout("mailbox receipt")),
                _ => Ok(Reply::ack(format!("echo {}", command))),
            }
        }
    }

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl ErrorSink for Lines {
        fn publish(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_fifo_completion() {
        let queue = MailboxQueue::new(2);
        let rec = Arc::new(Recorder::default());
        assert!(queue.submit(rec.clone(), "P1"));
        assert!(queue.submit(rec.clone(), "P2"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.process_pending(&Scripted), 2);
        assert!(queue.is_empty());

        let done = rec.completed.lock().unwrap();
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].command, "P1");
        assert_eq!(done[0].response, "echo P1");
        assert_eq!(done[0].terminator, Some(Terminator::Ack));
        assert_eq!(done[0].card, 2);
        assert_eq!(done[1].command, "P2");
    }

    #[test]
    fn test_overflow_clears_busy() {
        let queue = MailboxQueue::with_capacity(0, 2);
        let rec = Arc::new(Recorder::default());
        assert!(queue.submit(rec.clone(), "A"));
        assert!(queue.submit(rec.clone(), "B"));
        assert!(!queue.submit(rec.clone(), "C"));
        assert_eq!(rec.busy_cleared.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_error_response_goes_to_sink() {
        let queue = MailboxQueue::new(0);
        let sink = Arc::new(Lines::default());
        queue.set_error_sink(Some(sink.clone()));
        let rec = Arc::new(Recorder::default());
        queue.submit(rec.clone(), "BAD");
        queue.process_pending(&Scripted);

        assert!(rec.completed.lock().unwrap().is_empty());
        assert_eq!(rec.busy_cleared.load(Ordering::SeqCst), 1);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(
            chrono::NaiveDateTime::parse_from_str(&lines[0][..17], "%m/%d/%y %H:%M:%S").is_ok(),
            "{}",
            lines[0]
        );
        assert!(
            lines[0].ends_with(" PV=TEST:REC CMD=BAD ERR003 Data error or unrecognized command"),
            "{}",
            lines[0]
        );
    }

    #[test]
    fn test_transport_failure_clears_busy() {
        let queue = MailboxQueue::new(0);
        let rec = Arc::new(Recorder::default());
        queue.submit(rec.clone(), "DEAD");
        queue.submit(rec.clone(), "P3");
        assert_eq!(queue.process_pending(&Scripted), 2);
        assert_eq!(rec.busy_cleared.load(Ordering::SeqCst), 1);
        assert_eq!(rec.completed.lock().unwrap().len(), 1);
    }
}
