// Licensed under the Apache-2.0 license

//! File-style access to a controller's ASCII interfaces.
//!
//! Every configured controller gets `/dev/pmac/<card>/asc`, which talks
//! through the DPRAM ASCII buffers, and `/dev/pmac/<card>/mbx`, which talks
//! through the mailbox registers when the mailbox worker does not own them.
//! Replies are pushed into a byte ring by the readme interrupt handler and
//! pulled out by `read`.

use crate::controller::Controller;
use crate::error::{DeviceError, DriverError};
use crate::scan::{spawn_periodic, ScanOrder, Task};
use crate::sync::Semaphore;
use log::{debug, error, info, warn};
use pmac_common::consts::dpram::{
    ASCII_IN, ASCII_IN_CONTROL, ASCII_IN_LENGTH, ASCII_OUT, ASCII_OUT_CONTROL, ASCII_OUT_LEN,
};
use pmac_common::mailbox::{MBX_READ_STROBE, MBX_REGS_IN, MBX_REGS_OUT, TERM_ACK, TERM_BELL, TERM_CR};
use pmac_common::{Dpram, Interrupt, InterruptSink, MailboxRegisters, TransportError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Size of each device's reply ring; holds a gather response of 1024
/// samples of 3 variables.
pub const REPLY_RING_SIZE: usize = 40960;

/// How long `read` waits for a readme before servicing the interrupt by hand.
const README_POLL: Duration = Duration::from_millis(200);
/// Bound on the wait for the previous DPRAM ASCII transaction to finish.
const TRANSACTION_WAIT: Duration = Duration::from_millis(300);
const OUTPUT_SPIN_SLEEP: Duration = Duration::from_millis(1);
const OUTPUT_SPIN_WARN: usize = 10;
const POLL_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// DPRAM ASCII.
    Asc,
    /// Mailbox ASCII.
    Mbx,
}

impl DeviceKind {
    fn suffix(self) -> &'static str {
        match self {
            DeviceKind::Asc => "asc",
            DeviceKind::Mbx => "mbx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ioctl {
    /// Bytes waiting in the reply ring.
    Fionread,
    /// Discard the reply ring.
    Fiorflush,
    /// Wake a blocked reader, which returns 0 bytes.
    Fiocancel,
}

pub fn device_name(card: usize, kind: DeviceKind) -> String {
    format!("/dev/pmac/{}/{}", card, kind.suffix())
}

#[derive(Default)]
struct DeviceState {
    open: bool,
    cancel: bool,
    had_bell: bool,
    total_written: usize,
}

enum Port {
    Asc(Arc<dyn Dpram>),
    Mbx(Arc<dyn MailboxRegisters>),
}

pub struct PmacDevice {
    card: usize,
    kind: DeviceKind,
    port: Port,
    polling: bool,
    ring: Mutex<VecDeque<u8>>,
    readme: Semaphore,
    receipt: Semaphore,
    transaction: Semaphore,
    state: Mutex<DeviceState>,
    /// Held while the readme handler runs; the poller and a reader may
    /// both call it.
    isr: Mutex<()>,
    no_interrupt_count: AtomicUsize,
    timeout: Duration,
}

impl PmacDevice {
    fn new(card: usize, port: Port, polling: bool, timeout: Duration) -> Self {
        let kind = match port {
            Port::Asc(_) => DeviceKind::Asc,
            Port::Mbx(_) => DeviceKind::Mbx,
        };
        Self {
            card,
            kind,
            port,
            polling,
            ring: Mutex::new(VecDeque::with_capacity(REPLY_RING_SIZE)),
            readme: Semaphore::binary(),
            receipt: Semaphore::binary(),
            transaction: Semaphore::binary_full(),
            state: Mutex::new(DeviceState::default()),
            isr: Mutex::new(()),
            no_interrupt_count: AtomicUsize::new(0),
            timeout,
        }
    }

    pub fn name(&self) -> String {
        device_name(self.card, self.kind)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    /// Number of reads that had to service the interrupt by hand.
    pub fn no_interrupt_count(&self) -> usize {
        self.no_interrupt_count.load(Ordering::Relaxed)
    }

    fn open(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.open {
            return Err(DeviceError::AlreadyOpen(self.name()));
        }
        state.open = true;
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().open = false;
    }

    fn push(&self, bytes: &[u8]) {
        let mut ring = self.ring.lock().unwrap();
        for &b in bytes {
            if ring.len() >= REPLY_RING_SIZE {
                error!("PMAC reply ring buffer full, device {}", self.name());
                return;
            }
            ring.push_back(b);
        }
    }

    fn pull(&self, buf: &mut [u8]) -> usize {
        let mut ring = self.ring.lock().unwrap();
        let n = buf.len().min(ring.len());
        for (dst, src) in buf.iter_mut().zip(ring.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Reads whatever reply bytes are waiting, blocking until some arrive.
    /// Returns 0 when cancelled or when nothing arrived in time.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let n = self.pull(buf);
        if n > 0 {
            return n;
        }
        if !self.readme.take(Some(README_POLL)) {
            self.no_interrupt_count.fetch_add(1, Ordering::Relaxed);
            debug!("Manually calling ISR for PMAC card {}", self.card);
            self.service_interrupt();
            if !self.readme.take(Some(self.timeout)) {
                warn!("PMAC read timed out, device {}", self.name());
            }
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.cancel {
                state.cancel = false;
                return 0;
            }
        }
        self.pull(buf)
    }

    pub fn ioctl(&self, request: Ioctl) -> usize {
        match request {
            Ioctl::Fionread => self.ring.lock().unwrap().len(),
            Ioctl::Fiorflush => {
                self.ring.lock().unwrap().clear();
                0
            }
            Ioctl::Fiocancel => {
                self.state.lock().unwrap().cancel = true;
                self.readme.give();
                0
            }
        }
    }

    /// Sends command bytes. Returns the number of bytes consumed.
    pub fn write(&self, buf: &[u8]) -> Result<usize, DeviceError> {
        match &self.port {
            Port::Asc(dpram) => self.write_asc(dpram.as_ref(), buf),
            Port::Mbx(regs) => self.write_mbx(regs.as_ref(), buf),
        }
    }

    fn write_asc(&self, dpram: &dyn Dpram, buf: &[u8]) -> Result<usize, DeviceError> {
        if !self.transaction.take(Some(TRANSACTION_WAIT)) {
            debug!("PMAC ASCII transaction still open, device {}", self.name());
        }
        let mut written = 0;
        for &c in buf.iter().take(ASCII_OUT_LEN) {
            let mut state = self.state.lock().unwrap();
            if c == TERM_CR {
                dpram.put8(ASCII_OUT + state.total_written, 0);
                dpram.put8(ASCII_OUT_CONTROL, 1);
                state.total_written = 0;
            } else {
                if state.total_written == 0 {
                    self.wait_output_idle(dpram)?;
                }
                if state.total_written < ASCII_OUT_LEN - 1 {
                    dpram.put8(ASCII_OUT + state.total_written, c);
                    state.total_written += 1;
                } else {
                    warn!("PMAC ASCII line too long, device {}", self.name());
                }
            }
            written += 1;
        }
        Ok(written)
    }

    fn wait_output_idle(&self, dpram: &dyn Dpram) -> Result<(), DeviceError> {
        let deadline = Instant::now() + self.timeout;
        let mut count = 0;
        while dpram.get8(ASCII_OUT_CONTROL) != 0 {
            if Instant::now() >= deadline {
                error!("PMAC ASCII output never drained, device {}", self.name());
                return Err(TransportError::Timeout("ascii output").into());
            }
            thread::sleep(OUTPUT_SPIN_SLEEP);
            count += 1;
            if count > OUTPUT_SPIN_WARN {
                warn!("pmacWriteAsc: Stuck in while loop");
            }
        }
        Ok(())
    }

    fn write_mbx(&self, regs: &dyn MailboxRegisters, buf: &[u8]) -> Result<usize, DeviceError> {
        let mut written = 0;
        let mut j = 0;
        while j < buf.len() {
            let first = buf[j];
            for i in 1..MBX_REGS_OUT {
                let Some(&c) = buf.get(j + i) else {
                    break;
                };
                regs.write(i + 1, c);
                written += 1;
                if c == TERM_CR {
                    break;
                }
            }
            self.receipt.clear();
            regs.write(0, first);
            written += 1;
            regs.write(MBX_READ_STROBE, 0);
            if !self.receipt.take(Some(self.timeout)) {
                error!("PMAC MBX RECEIPT FAILED, controller: {}", self.card);
                return Err(TransportError::Timeout("mailbox receipt").into());
            }
            j += MBX_REGS_OUT;
        }
        Ok(written)
    }

    /// The readme interrupt handler. Called by the interrupt router, by the
    /// polling task, or by `read` when no interrupt showed up.
    pub fn service_interrupt(&self) {
        let _isr = self.isr.lock().unwrap();
        match &self.port {
            Port::Asc(dpram) => self.service_asc(dpram.as_ref()),
            Port::Mbx(regs) => self.service_mbx(regs.as_ref()),
        }
    }

    fn service_asc(&self, dpram: &dyn Dpram) {
        let control = dpram.get16(ASCII_IN_CONTROL);
        if control == 0 {
            if !self.polling {
                debug!("No response from PMAC, device {}", self.name());
            }
            return;
        }
        let [lo, hi] = control.to_le_bytes();
        if hi == 0 {
            let length = dpram.get16(ASCII_IN_LENGTH).saturating_sub(1) as usize;
            let mut data = vec![0u8; length];
            dpram.read(ASCII_IN, &mut data);
            self.push(&data);
            self.push(&[lo]);
        } else {
            self.push(&[
                TERM_BELL,
                b'E',
                b'R',
                b'R',
                b'0' + (hi & 0xF),
                b'0' + ((lo >> 4) & 0xF),
                b'0' + (lo & 0xF),
                TERM_CR,
                TERM_ACK,
            ]);
        }
        dpram.put16(ASCII_IN_CONTROL, 0);
        self.readme.give();
        if lo == TERM_ACK {
            self.transaction.give();
        }
    }

    fn service_mbx(&self, regs: &dyn MailboxRegisters) {
        let mut last = 0;
        for i in 0..MBX_REGS_IN {
            let c = regs.read(i);
            self.push(&[c]);
            last = c;
            if matches!(c, TERM_CR | TERM_ACK | TERM_BELL) {
                let mut state = self.state.lock().unwrap();
                if state.had_bell {
                    self.push(&[TERM_ACK]);
                    last = TERM_ACK;
                }
                state.had_bell = c == TERM_BELL;
                break;
            }
        }
        if last != TERM_ACK {
            regs.write(MBX_READ_STROBE, 0);
        }
        self.readme.give();
    }
}

impl InterruptSink for PmacDevice {
    fn raise(&self, irq: Interrupt) {
        match irq {
            Interrupt::MbxReceipt => self.receipt.give(),
            Interrupt::MbxReadme | Interrupt::AscReadme => self.service_interrupt(),
        }
    }
}

/// An open device. Closing happens on drop.
pub struct DeviceHandle {
    device: Arc<PmacDevice>,
}

impl DeviceHandle {
    pub fn device(&self) -> &Arc<PmacDevice> {
        &self.device
    }

    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.device.read(buf)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, DeviceError> {
        self.device.write(buf)
    }

    pub fn ioctl(&self, request: Ioctl) -> usize {
        self.device.ioctl(request)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.device.close();
    }
}

/// The installed devices, by name.
#[derive(Default)]
pub struct DeviceTable {
    devices: BTreeMap<String, Arc<PmacDevice>>,
    pollers: Vec<Task>,
}

impl DeviceTable {
    /// Adds the devices of one controller. The `mbx` device is only added
    /// when the controller's mailbox worker is disabled.
    pub fn install(&mut self, controller: &Controller, polling: bool) -> Result<(), DriverError> {
        let card = controller.card();
        let Some(dpram) = controller.dpram() else {
            debug!("controller {} has no DPRAM, no devices installed", card);
            return Ok(());
        };
        let timeout = controller.config().mailbox_timeouts().readme;
        let router = controller.interrupts();

        let asc = Arc::new(PmacDevice::new(
            card,
            Port::Asc(dpram.clone()),
            polling,
            timeout,
        ));
        if polling {
            let dev = asc.clone();
            let task = spawn_periodic(
                format!("pmacPoll{}", card),
                POLL_PERIOD,
                ScanOrder::ReadFirst,
                move || dev.service_interrupt(),
            )?;
            self.pollers.push(task);
        } else {
            router.claim_ascii(asc.clone());
        }
        info!("installed {}", asc.name());
        self.devices.insert(asc.name(), asc);

        if let Some(regs) = controller.mailbox_registers() {
            if controller.mailbox_enabled() {
                debug!("controller {} mailbox owned by the worker", card);
            } else {
                let mbx = Arc::new(PmacDevice::new(card, Port::Mbx(regs.clone()), false, timeout));
                router.claim_mailbox(mbx.clone());
                info!("installed {}", mbx.name());
                self.devices.insert(mbx.name(), mbx);
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn device(&self, name: &str) -> Option<Arc<PmacDevice>> {
        self.devices.get(name).cloned()
    }

    /// Opens `path`. The longest installed name that prefixes `path` is the
    /// device; anything left over is an error.
    pub fn open(&self, path: &str) -> Result<DeviceHandle, DeviceError> {
        let device = self
            .devices
            .iter()
            .filter(|(name, _)| path.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(name, dev)| (name.len(), dev))
            .filter(|(len, _)| *len == path.len())
            .map(|(_, dev)| dev.clone())
            .ok_or_else(|| DeviceError::NoSuchDevice(path.to_string()))?;
        device.open()?;
        Ok(DeviceHandle { device })
    }

    /// Stops the polling tasks.
    pub fn shutdown(&mut self) {
        for mut task in self.pollers.drain(..) {
            task.stop();
        }
    }
}

impl Drop for DeviceTable {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmac_common::SharedDpram;

    fn asc() -> (PmacDevice, SharedDpram) {
        let ram = SharedDpram::new();
        let dev = PmacDevice::new(
            0,
            Port::Asc(Arc::new(ram.clone())),
            false,
            Duration::from_millis(50),
        );
        (dev, ram)
    }

    #[derive(Default)]
    struct Regs(Mutex<[u8; 16]>, Mutex<Vec<(usize, u8)>>);

    impl MailboxRegisters for Regs {
        fn read(&self, index: usize) -> u8 {
            self.0.lock().unwrap()[index]
        }
        fn write(&self, index: usize, value: u8) {
            self.1.lock().unwrap().push((index, value));
        }
    }

    #[test]
    fn test_asc_line_output() {
        let (dev, ram) = asc();
        assert_eq!(dev.write(b"I10\r").unwrap(), 4);
        assert_eq!(ram.get8(ASCII_OUT), b'I');
        assert_eq!(ram.get8(ASCII_OUT + 2), b'0');
        assert_eq!(ram.get8(ASCII_OUT + 3), 0);
        assert_eq!(ram.get8(ASCII_OUT_CONTROL), 1);
    }

    #[test]
    fn test_asc_output_blocked() {
        let (dev, ram) = asc();
        ram.put8(ASCII_OUT_CONTROL, 1);
        assert_eq!(
            dev.write(b"P1\r"),
            Err(DeviceError::Transport(TransportError::Timeout("ascii output")))
        );
    }

    #[test]
    fn test_asc_readme_data_and_error() {
        let (dev, ram) = asc();
        dev.service_interrupt();
        assert_eq!(dev.ioctl(Ioctl::Fionread), 0);

        ram.write(ASCII_IN, b"1234");
        ram.put16(ASCII_IN_LENGTH, 5);
        ram.put16(ASCII_IN_CONTROL, TERM_CR as u16);
        dev.service_interrupt();
        assert_eq!(ram.get16(ASCII_IN_CONTROL), 0);

        ram.put16(ASCII_IN_CONTROL, 0x8003);
        dev.service_interrupt();

        let mut buf = [0u8; 64];
        let n = dev.read(&mut buf);
        assert_eq!(&buf[..n], b"1234\r\x07ERR003\r\x06");
    }

    #[test]
    fn test_cancel_returns_zero() {
        let (dev, _ram) = asc();
        dev.ioctl(Ioctl::Fiocancel);
        let mut buf = [0u8; 8];
        assert_eq!(dev.read(&mut buf), 0);
        assert!(!dev.state.lock().unwrap().cancel);
    }

    #[test]
    fn test_read_services_missed_interrupt() {
        let (dev, ram) = asc();
        ram.put16(ASCII_IN_LENGTH, 1);
        ram.put16(ASCII_IN_CONTROL, TERM_ACK as u16);
        let mut buf = [0u8; 8];
        assert_eq!(dev.read(&mut buf), 1);
        assert_eq!(buf[0], TERM_ACK);
        assert_eq!(dev.no_interrupt_count(), 1);
    }

    #[test]
    fn test_mbx_readme_appends_ack_after_bell() {
        let regs = Arc::new(Regs::default());
        let dev = PmacDevice::new(1, Port::Mbx(regs.clone()), false, Duration::from_millis(50));

        regs.0.lock().unwrap()[..7].copy_from_slice(b"\x07ERR003");
        dev.service_interrupt();
        regs.0.lock().unwrap()[0] = TERM_CR;
        dev.service_interrupt();

        let mut buf = [0u8; 32];
        let n = dev.read(&mut buf);
        assert_eq!(&buf[..n], b"\x07\r\x06");
        // The strobe is skipped once the reply is complete.
        assert_eq!(regs.1.lock().unwrap().as_slice(), &[(1, 0)]);
    }

    #[test]
    fn test_mbx_write_chunks() {
        let regs = Arc::new(Regs::default());
        let dev = Arc::new(PmacDevice::new(
            1,
            Port::Mbx(regs.clone()),
            false,
            Duration::from_millis(50),
        ));
        let acker = {
            let dev = dev.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    dev.raise(Interrupt::MbxReceipt);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        assert_eq!(dev.write(b"#1J+\r").unwrap(), 5);
        acker.join().unwrap();
        let writes = regs.1.lock().unwrap();
        assert_eq!(
            &writes[..6],
            &[(2, b'1'), (3, b'J'), (4, b'+'), (5, b'\r'), (0, b'#'), (1, 0)]
        );
    }

    #[test]
    fn test_open_close() {
        let mut table = DeviceTable::default();
        let (dev, _ram) = asc();
        table.devices.insert(dev.name(), Arc::new(dev));

        let handle = table.open("/dev/pmac/0/asc").unwrap();
        assert!(matches!(
            table.open("/dev/pmac/0/asc"),
            Err(DeviceError::AlreadyOpen(_))
        ));
        assert!(matches!(
            table.open("/dev/pmac/0/ascii"),
            Err(DeviceError::NoSuchDevice(_))
        ));
        assert!(matches!(
            table.open("/dev/pmac/1/asc"),
            Err(DeviceError::NoSuchDevice(_))
        ));
        drop(handle);
        assert!(table.open("/dev/pmac/0/asc").is_ok());
    }
}
