// Licensed under the Apache-2.0 license

use log::debug;
use pmac_common::{Interrupt, InterruptSink};
use std::sync::{Arc, Mutex};

type Handler = Mutex<Option<Arc<dyn InterruptSink>>>;

/// Delivers a controller's interrupts to whoever has claimed them: the
/// mailbox driver or the file-style device shim.
pub struct InterruptRouter {
    card: usize,
    mailbox: Handler,
    ascii: Handler,
}

impl InterruptRouter {
    pub fn new(card: usize) -> Self {
        Self {
            card,
            mailbox: Mutex::new(None),
            ascii: Mutex::new(None),
        }
    }

    /// Routes receipt and readme interrupts of the mailbox registers.
    pub fn claim_mailbox(&self, handler: Arc<dyn InterruptSink>) {
        *self.mailbox.lock().unwrap() = Some(handler);
    }

    /// Routes DPRAM ASCII readme interrupts.
    pub fn claim_ascii(&self, handler: Arc<dyn InterruptSink>) {
        *self.ascii.lock().unwrap() = Some(handler);
    }

    pub fn release_ascii(&self) {
        *self.ascii.lock().unwrap() = None;
    }

    pub fn release_mailbox(&self) {
        *self.mailbox.lock().unwrap() = None;
    }
}

impl InterruptSink for InterruptRouter {
    fn raise(&self, irq: Interrupt) {
        let slot = match irq {
            Interrupt::MbxReceipt | Interrupt::MbxReadme => &self.mailbox,
            Interrupt::AscReadme => &self.ascii,
        };
        let handler = slot.lock().unwrap().clone();
        match handler {
            Some(handler) => handler.raise(irq),
            None => debug!("unclaimed {:?} interrupt, controller: {}", irq, self.card),
        }
    }
}
