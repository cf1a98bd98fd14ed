// Licensed under the Apache-2.0 license

use crate::address::{background_cs, motor_mask_bit, AddressSpec, ScanBuffer};
use crate::config::ControllerConfig;
use crate::error::{ConfigError, DriverError, ResolveError};
use crate::interrupt::InterruptRouter;
use crate::mailbox::VmeMailbox;
use crate::queue::{ErrorSink, MailboxQueue, Requester};
use crate::scan::{spawn_mailbox_worker, spawn_periodic, ScanOrder, Task};
use crate::slot::{Slot, Subscriber};
use log::{debug, error, info, warn};
use pmac_common::codec;
use pmac_common::consts::dpram::{
    BACKGROUND_MAX_CS, BACKGROUND_READY, BACKGROUND_READY_BIT, MOTOR_MASK_HI, MOTOR_MASK_LO,
    MOTOR_READY, MOTOR_READY_BIT, VARIABLE_READY, VARIABLE_READY_BIT, VARIABLE_SIZE,
    VARIABLE_START, VARIABLE_START_OFFSET, VARIABLE_TABLE_WORD,
};
use pmac_common::consts::var_format;
use pmac_common::{Dpram, MailboxRegisters, MailboxTransport, Region, Reply, Value};
use std::sync::{Arc, Mutex};

/// How the host reaches a controller.
pub enum Transport {
    /// DPRAM window plus mailbox registers on the VME bus.
    Vme {
        dpram: Arc<dyn Dpram>,
        mailbox: Arc<dyn MailboxRegisters>,
    },
    /// Mailbox-equivalent command channel only, e.g. an SSH session.
    Remote(Arc<dyn MailboxTransport>),
}

type Tables = [Vec<Arc<Slot>>; 5];

/// One configured PMAC.
pub struct Controller {
    card: usize,
    config: ControllerConfig,
    dpram: Option<Arc<dyn Dpram>>,
    mailbox_regs: Option<Arc<dyn MailboxRegisters>>,
    mailbox: Option<Arc<dyn MailboxTransport>>,
    interrupts: Arc<InterruptRouter>,
    tables: Mutex<Tables>,
    queue: Arc<MailboxQueue>,
    tasks: Mutex<Vec<Task>>,
}

impl Controller {
    pub fn new(card: usize, transport: Transport, config: ControllerConfig) -> Self {
        let interrupts = Arc::new(InterruptRouter::new(card));
        let (dpram, mailbox_regs, mailbox) = match transport {
            Transport::Vme { dpram, mailbox } => {
                // Nothing is scanned until slots ask for it.
                dpram.put16(MOTOR_MASK_LO, 0);
                dpram.put16(MOTOR_MASK_HI, 0);
                dpram.put16(BACKGROUND_MAX_CS, 0);
                let transport = if config.mailbox_enabled {
                    let vme = Arc::new(VmeMailbox::new(
                        card,
                        mailbox.clone(),
                        config.mailbox_timeouts(),
                    ));
                    interrupts.claim_mailbox(vme.clone());
                    Some(vme as Arc<dyn MailboxTransport>)
                } else {
                    None
                };
                (Some(dpram), Some(mailbox), transport)
            }
            Transport::Remote(remote) => {
                let transport = config.mailbox_enabled.then_some(remote);
                (None, None, transport)
            }
        };
        Self {
            card,
            config,
            dpram,
            mailbox_regs,
            mailbox,
            interrupts,
            tables: Mutex::new(Default::default()),
            queue: Arc::new(MailboxQueue::new(card)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn card(&self) -> usize {
        self.card
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Interrupt entry point for whoever plays the hardware.
    pub fn interrupts(&self) -> Arc<InterruptRouter> {
        self.interrupts.clone()
    }

    pub(crate) fn dpram(&self) -> Option<&Arc<dyn Dpram>> {
        self.dpram.as_ref()
    }

    pub(crate) fn mailbox_registers(&self) -> Option<&Arc<dyn MailboxRegisters>> {
        self.mailbox_regs.as_ref()
    }

    pub fn mailbox_enabled(&self) -> bool {
        self.mailbox.is_some()
    }

    /// Binds `spec`, shifted by `offset`, to a new slot.
    pub fn register(
        &self,
        offset: i32,
        spec: &str,
        subscriber: Option<Arc<dyn Subscriber>>,
    ) -> Result<Arc<Slot>, DriverError> {
        let spec = AddressSpec::parse(spec)?.offset_by(offset)?;
        let dpram = self.dpram.as_ref().ok_or(ResolveError::NoDpram(self.card))?;
        let buffer = spec.buffer();
        let host_offset = match buffer {
            ScanBuffer::Variable => None,
            _ => Some(
                spec.host_offset()
                    .ok_or(ResolveError::AddressOutOfRange(spec.address as u64))?,
            ),
        };

        let mut tables = self.tables.lock().unwrap();
        let table = &mut tables[buffer.index()];
        if table.len() >= buffer.capacity() {
            error!(
                "{:?} table full, controller: {}, address {}",
                buffer, self.card, spec
            );
            return Err(ResolveError::TableFull(buffer).into());
        }

        match buffer {
            ScanBuffer::Motor => {
                if let Some((word, bit)) = motor_mask_bit(spec.address) {
                    dpram.put16(word, dpram.get16(word) | bit);
                }
            }
            ScanBuffer::Background => {
                let cs = background_cs(spec.address);
                let max = (dpram.get16(BACKGROUND_MAX_CS) & 0x1F) as i64;
                if cs >= max {
                    dpram.put16(BACKGROUND_MAX_CS, (cs + 1) as u16);
                }
            }
            _ => {}
        }

        let slot = Arc::new(Slot::new(spec, buffer, table.len(), host_offset, subscriber));
        table.push(slot.clone());
        drop(tables);
        debug!("controller {} registered {}", self.card, slot);

        if buffer == ScanBuffer::Timestamp {
            decode(dpram.as_ref(), &slot);
            slot.notify();
        }
        Ok(slot)
    }

    pub fn slot_count(&self, buffer: ScanBuffer) -> usize {
        self.tables.lock().unwrap()[buffer.index()].len()
    }

    pub fn slot(&self, buffer: ScanBuffer, index: usize) -> Result<Arc<Slot>, DriverError> {
        self.tables.lock().unwrap()[buffer.index()]
            .get(index)
            .cloned()
            .ok_or(DriverError::NoSuchSlot { buffer, index })
    }

    fn slots(&self, buffer: ScanBuffer) -> Vec<Arc<Slot>> {
        self.tables.lock().unwrap()[buffer.index()].clone()
    }

    /// Writes the variable buffer configuration table: one (address, format)
    /// pair per variable slot, data packed after the table.
    pub fn setup_variables(&self) -> Result<(), DriverError> {
        let dpram = self.dpram.as_ref().ok_or(ResolveError::NoDpram(self.card))?;
        let vars = self.slots(ScanBuffer::Variable);

        dpram.put16(VARIABLE_SIZE, 0);
        dpram.put16(VARIABLE_START, VARIABLE_START_OFFSET);

        let mut config_ofs = 4 * VARIABLE_TABLE_WORD;
        let mut host_ofs = 4 * (VARIABLE_TABLE_WORD + vars.len());
        for slot in &vars {
            let format = match slot.region() {
                Region::Y | Region::SY => var_format::Y,
                Region::X | Region::SX => var_format::X,
                Region::D | Region::L => var_format::L,
                other => {
                    error!(
                        "variable slot {} has unsupported region, controller: {}",
                        slot, self.card
                    );
                    return Err(ConfigError::UnsupportedVariableFormat(other).into());
                }
            };
            slot.set_host_offset(host_ofs);
            dpram.put16(config_ofs, slot.address() as u16);
            dpram.put16(config_ofs + 2, format);
            config_ofs += 4;
            host_ofs += if format == var_format::L { 8 } else { 4 };
        }

        dpram.put16(VARIABLE_SIZE, vars.len() as u16);
        dpram.put16(VARIABLE_READY, 0);
        info!(
            "controller {} variable buffer: {} entries",
            self.card,
            vars.len()
        );
        Ok(())
    }

    /// One motor scan pass. Returns whether the buffer was ready.
    pub fn read_motor(&self) -> bool {
        self.scan(MOTOR_READY, MOTOR_READY_BIT, &[ScanBuffer::Motor], |status| {
            status & 0x7FFF
        })
    }

    /// One background scan pass.
    pub fn read_background(&self) -> bool {
        self.scan(
            BACKGROUND_READY,
            BACKGROUND_READY_BIT,
            &[ScanBuffer::Background],
            |_| 0,
        )
    }

    /// One variable scan pass; the time stamp rides along.
    pub fn read_variables(&self) -> bool {
        self.scan(
            VARIABLE_READY,
            VARIABLE_READY_BIT,
            &[ScanBuffer::Variable, ScanBuffer::Timestamp],
            |_| 0,
        )
    }

    fn scan(
        &self,
        ready: usize,
        bit: u16,
        buffers: &[ScanBuffer],
        clear: impl Fn(u16) -> u16,
    ) -> bool {
        let Some(dpram) = self.dpram.as_ref() else {
            return false;
        };
        let status = dpram.get16(ready);
        if status & bit == 0 {
            return false;
        }
        let slots: Vec<Arc<Slot>> = buffers.iter().flat_map(|b| self.slots(*b)).collect();
        for slot in &slots {
            decode(dpram.as_ref(), slot);
        }
        dpram.put16(ready, clear(status));
        for slot in &slots {
            slot.notify();
        }
        true
    }

    /// Reads an open-range slot on demand.
    pub fn read_slot(&self, slot: &Slot) -> Result<Value, DriverError> {
        let dpram = self.open_dpram(slot)?;
        decode(dpram.as_ref(), slot);
        Ok(slot.value())
    }

    /// Writes an open-range slot. D and L data cannot be written.
    pub fn write_slot(&self, slot: &Slot, value: Value) -> Result<(), DriverError> {
        let dpram = self.open_dpram(slot)?;
        let Some(ofs) = slot.host_offset() else {
            return Err(DriverError::NotOpenSlot);
        };
        let mut buf = [0u8; 4];
        codec::put_data(slot.region(), &mut buf, value)?;
        let len = match slot.region() {
            Region::HY | Region::HX => 2,
            _ => 4,
        };
        dpram.write(ofs, &buf[..len]);
        slot.store(value);
        Ok(())
    }

    fn open_dpram(&self, slot: &Slot) -> Result<&Arc<dyn Dpram>, DriverError> {
        if slot.buffer() != ScanBuffer::Open {
            return Err(DriverError::NotOpenSlot);
        }
        self.dpram
            .as_ref()
            .ok_or_else(|| ResolveError::NoDpram(self.card).into())
    }

    /// One line describing a slot.
    pub fn show_slot(&self, buffer: ScanBuffer, index: usize) -> Result<String, DriverError> {
        Ok(self.slot(buffer, index)?.to_string())
    }

    /// Queues a mailbox command. `Ok(false)` when the queue overflowed and
    /// the request was dropped.
    pub fn submit(
        &self,
        requester: Arc<dyn Requester>,
        command: impl Into<String>,
    ) -> Result<bool, DriverError> {
        if self.mailbox.is_none() {
            return Err(DriverError::MailboxDisabled(self.card));
        }
        Ok(self.queue.submit(requester, command))
    }

    /// Runs one mailbox transaction on the calling thread.
    pub fn write_read(&self, command: &str) -> Result<Reply, DriverError> {
        let mailbox = self
            .mailbox
            .as_ref()
            .ok_or(DriverError::MailboxDisabled(self.card))?;
        Ok(mailbox.write_read(command)?)
    }

    pub fn set_error_sink(&self, sink: Option<Arc<dyn ErrorSink>>) {
        self.queue.set_error_sink(sink);
    }

    pub fn queue(&self) -> &Arc<MailboxQueue> {
        &self.queue
    }

    /// Starts the mailbox worker and the enabled scan loops.
    pub fn start(self: &Arc<Self>) -> Result<(), DriverError> {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            warn!("controller {} already started", self.card);
            return Ok(());
        }
        let card = self.card;
        if let Some(mailbox) = &self.mailbox {
            self.queue.resume();
            tasks.push(spawn_mailbox_worker(
                format!("pmacMbx{}", card),
                self.queue.clone(),
                mailbox.clone(),
            )?);
        }
        if self.dpram.is_none() {
            return Ok(());
        }
        if self.config.motor_enabled {
            let c = self.clone();
            tasks.push(spawn_periodic(
                format!("pmacMtr{}", card),
                self.config.motor_period(),
                ScanOrder::DelayFirst,
                move || {
                    c.read_motor();
                },
            )?);
        }
        if self.config.background_enabled {
            let c = self.clone();
            tasks.push(spawn_periodic(
                format!("pmacBkg{}", card),
                self.config.background_period(),
                ScanOrder::ReadFirst,
                move || {
                    c.read_background();
                },
            )?);
        }
        if self.config.variable_enabled {
            if let Err(e) = self.setup_variables() {
                error!("controller {} variable setup failed: {}", card, e);
            }
            let c = self.clone();
            tasks.push(spawn_periodic(
                format!("pmacVar{}", card),
                self.config.variable_period(),
                ScanOrder::ReadFirst,
                move || {
                    c.read_variables();
                },
            )?);
        }
        Ok(())
    }

    /// Stops every task of this controller and waits for them. A later
    /// `start` brings them back.
    pub fn stop(&self) {
        self.queue.shutdown();
        let tasks: Vec<Task> = self.tasks.lock().unwrap().drain(..).collect();
        for mut task in tasks {
            task.stop();
        }
    }

    /// Multi-line summary for the registry report.
    pub fn report(&self, level: u32) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "  card {}: enabledMbx={} enabledMtr={} enabledBkg={} enabledVar={}\n",
            self.card,
            self.mailbox_enabled(),
            self.config.motor_enabled,
            self.config.background_enabled,
            self.config.variable_enabled
        ));
        out.push_str(&format!(
            "    numMtrIo={} numBkgIo={} numVarIo={} numOpnIo={} queued={}\n",
            self.slot_count(ScanBuffer::Motor),
            self.slot_count(ScanBuffer::Background),
            self.slot_count(ScanBuffer::Variable),
            self.slot_count(ScanBuffer::Open),
            self.queue.len()
        ));
        if level > 1 {
            let tables = self.tables.lock().unwrap();
            for slot in tables.iter().flatten() {
                out.push_str(&format!("    {}\n", slot));
            }
        }
        out
    }
}

fn decode(dpram: &dyn Dpram, slot: &Slot) {
    let Some(ofs) = slot.host_offset() else {
        return;
    };
    let mut buf = [0u8; 8];
    let width = slot.region().width();
    dpram.read(ofs, &mut buf[..width]);
    slot.store(codec::get_data(slot.region(), &buf[..width]));
}
