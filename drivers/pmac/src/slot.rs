// Licensed under the Apache-2.0 license

use crate::address::{AddressSpec, ScanBuffer};
use pmac_common::{Region, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Receiver of freshly decoded slot values. Called from the scan threads.
pub trait Subscriber: Send + Sync {
    fn on_data(&self, value: Value);
}

#[derive(Debug, Default)]
struct SlotState {
    host_offset: Option<usize>,
    value: Value,
}

/// One subscriber's binding to one PMAC address. Lives as long as its
/// controller; its position in the scan table never changes.
pub struct Slot {
    spec: AddressSpec,
    buffer: ScanBuffer,
    index: usize,
    state: Mutex<SlotState>,
    subscriber: Option<Arc<dyn Subscriber>>,
}

impl Slot {
    pub(crate) fn new(
        spec: AddressSpec,
        buffer: ScanBuffer,
        index: usize,
        host_offset: Option<usize>,
        subscriber: Option<Arc<dyn Subscriber>>,
    ) -> Self {
        Self {
            spec,
            buffer,
            index,
            state: Mutex::new(SlotState {
                host_offset,
                value: Value::default(),
            }),
            subscriber,
        }
    }

    pub fn region(&self) -> Region {
        self.spec.region
    }

    pub fn address(&self) -> u32 {
        self.spec.address
    }

    pub fn buffer(&self) -> ScanBuffer {
        self.buffer
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Host byte offset into DPRAM. Variable slots get theirs from the
    /// variable buffer setup pass.
    pub fn host_offset(&self) -> Option<usize> {
        self.state.lock().unwrap().host_offset
    }

    /// Most recently decoded value.
    pub fn value(&self) -> Value {
        self.state.lock().unwrap().value
    }

    pub(crate) fn set_host_offset(&self, ofs: usize) {
        self.state.lock().unwrap().host_offset = Some(ofs);
    }

    pub(crate) fn store(&self, value: Value) {
        self.state.lock().unwrap().value = value;
    }

    pub(crate) fn notify(&self) {
        if let Some(subscriber) = &self.subscriber {
            subscriber.on_data(self.value());
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("spec", &self.spec)
            .field("buffer", &self.buffer)
            .field("index", &self.index)
            .field("state", &self.state)
            .field("subscriber", &self.subscriber.is_some())
            .finish()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        write!(
            f,
            "{:?}[{}] {} hostOfs=",
            self.buffer, self.index, self.spec
        )?;
        match state.host_offset {
            Some(ofs) => write!(f, "{:#06x}", ofs)?,
            None => f.write_str("unassigned")?,
        }
        write!(f, " long={} double={}", state.value.long, state.value.double)
    }
}
