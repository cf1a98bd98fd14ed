// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use log::LevelFilter;
use pmac_common::Value;
use pmac_driver::{
    Controller, ControllerConfig, ControllerRegistry, ErrorSink, MailboxRequest, Requester,
    Subscriber, Transport,
};
use pmac_emulator::EmulatedPmac;
use simple_logger::SimpleLogger;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Scan configuration fast enough for tests, with every loop disabled.
pub fn quiet_config() -> ControllerConfig {
    ControllerConfig {
        motor_enabled: false,
        background_enabled: false,
        variable_enabled: false,
        motor_period_ms: 5.0,
        background_period_ms: 5.0,
        variable_period_ms: 5.0,
        mailbox_timeout_ms: 2000,
        ..Default::default()
    }
}

/// An emulated VME PMAC wired to a controller of a fresh registry.
pub struct Bench {
    pub registry: ControllerRegistry,
    pub controller: Arc<Controller>,
    pub pmac: EmulatedPmac,
}

impl Bench {
    pub fn new(config: ControllerConfig) -> Self {
        init_logger();
        let pmac = EmulatedPmac::new(0);
        let registry = ControllerRegistry::new();
        let transport = Transport::Vme {
            dpram: Arc::new(pmac.dpram()),
            mailbox: pmac.mailbox(),
        };
        let controller = registry
            .configure(0, transport, config)
            .expect("configure controller 0");
        pmac.attach(controller.interrupts());
        Self {
            registry,
            controller,
            pmac,
        }
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

/// Records every value a slot delivers.
#[derive(Default)]
pub struct Recorder {
    values: Mutex<Vec<Value>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn values(&self) -> Vec<Value> {
        self.values.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}

impl Subscriber for Recorder {
    fn on_data(&self, value: Value) {
        self.values.lock().unwrap().push(value);
    }
}

/// A requester that counts dropped requests and keeps completed ones.
pub struct Client {
    name: String,
    cleared: AtomicUsize,
    completed: Mutex<Vec<MailboxRequest>>,
}

impl Client {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            cleared: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        })
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<MailboxRequest> {
        self.completed.lock().unwrap().clone()
    }

    pub fn finished(&self) -> usize {
        self.cleared() + self.completed.lock().unwrap().len()
    }
}

impl Requester for Client {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear_busy(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn complete(&self, request: MailboxRequest) {
        self.completed.lock().unwrap().push(request);
    }
}

#[derive(Default)]
pub struct Lines(Mutex<Vec<String>>);

impl Lines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl ErrorSink for Lines {
    fn publish(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}
