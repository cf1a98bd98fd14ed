// Licensed under the Apache-2.0 license

use crate::frames::{ascii_frames, error_control, mailbox_frames, AsciiFrame, MailboxFrame};
use crate::memory::{encode, PmacMemory};
use crate::responder::{Responder, VariableStore};
use log::{debug, error, info, warn};
use pmac_common::consts::dpram::{
    ASCII_IN, ASCII_IN_CONTROL, ASCII_IN_LENGTH, ASCII_OUT, ASCII_OUT_CONTROL, ASCII_OUT_LEN,
    BACKGROUND_READY, BACKGROUND_READY_BIT, MOTOR_READY, MOTOR_READY_BIT, VARIABLE_READY,
};
use pmac_common::consts::DPRAM_BASE;
use pmac_common::mailbox::{MBX_READ_STROBE, MBX_REGS, TERM_ACK, TERM_CR};
use pmac_common::{
    Dpram, Interrupt, InterruptSink, MailboxRegisters, Region, SharedDpram, Value,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Period of the controller's housekeeping loop.
const TICK: Duration = Duration::from_millis(1);

enum Event {
    /// MB[0] was written; the chunk is MB[0] followed by MB[2..16].
    Chunk(Vec<u8>),
    /// MB[1] was written: the host is ready for the next frame.
    Strobe,
    AutoPublish(Option<Duration>),
    Stop,
}

type SharedSink = Arc<Mutex<Option<Arc<dyn InterruptSink>>>>;

fn raise(sink: &SharedSink, irq: Interrupt) {
    let sink = sink.lock().unwrap().clone();
    if let Some(sink) = sink {
        sink.raise(irq);
    }
}

/// The 16 mailbox registers as the host sees them.
pub struct EmulatedMailbox {
    regs: Mutex<[u8; MBX_REGS]>,
    events: Mutex<Sender<Event>>,
}

impl EmulatedMailbox {
    fn load(&self, frame: &MailboxFrame) {
        *self.regs.lock().unwrap() = *frame;
    }
}

impl MailboxRegisters for EmulatedMailbox {
    fn read(&self, index: usize) -> u8 {
        self.regs.lock().unwrap().get(index).copied().unwrap_or(0)
    }

    fn write(&self, index: usize, value: u8) {
        let event = {
            let mut regs = self.regs.lock().unwrap();
            let Some(reg) = regs.get_mut(index) else {
                warn!("write to mailbox register {} ignored", index);
                return;
            };
            *reg = value;
            match index {
                0 => {
                    let mut chunk = vec![regs[0]];
                    chunk.extend_from_slice(&regs[2..]);
                    Some(Event::Chunk(chunk))
                }
                MBX_READ_STROBE => Some(Event::Strobe),
                _ => None,
            }
        };
        if let Some(event) = event {
            let _ = self.events.lock().unwrap().send(event);
        }
    }
}

/// State shared between the handle and the controller thread.
struct Shared {
    card: usize,
    dpram: SharedDpram,
    mailbox: Arc<EmulatedMailbox>,
    memory: Mutex<PmacMemory>,
    responder: Mutex<Box<dyn Responder>>,
    sink: SharedSink,
    timestamp: AtomicU32,
}

impl Shared {
    fn respond(&self, command: &str) -> crate::responder::Response {
        let response = self.responder.lock().unwrap().respond(command);
        debug!("pmac{} [{}] -> {:?}", self.card, command, response);
        response
    }

    fn publish_variables(&self) -> usize {
        let count = self.memory.lock().unwrap().gather(&self.dpram);
        let ts = self.timestamp.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let mut p = [0u8; 4];
        pmac_common::codec::put32(&mut p, ((ts << 1) | 1) & 0x00FF_FFFF);
        self.dpram.write(VARIABLE_READY, &p);
        count
    }
}

/// A simulated PMAC on the VME bus: DPRAM, mailbox registers, the DPRAM
/// ASCII interface and the background variable gatherer. A controller
/// thread runs from `new` until drop.
pub struct EmulatedPmac {
    shared: Arc<Shared>,
    events: Sender<Event>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EmulatedPmac {
    pub fn new(card: usize) -> Self {
        Self::with_responder(card, Box::new(VariableStore::new()))
    }

    pub fn with_responder(card: usize, responder: Box<dyn Responder>) -> Self {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            card,
            dpram: SharedDpram::new(),
            mailbox: Arc::new(EmulatedMailbox {
                regs: Mutex::new([0; MBX_REGS]),
                events: Mutex::new(tx.clone()),
            }),
            memory: Mutex::new(PmacMemory::new()),
            responder: Mutex::new(responder),
            sink: Arc::new(Mutex::new(None)),
            timestamp: AtomicU32::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));
        let mut device = Device {
            shared: shared.clone(),
            running: running.clone(),
            command: Vec::new(),
            frames: VecDeque::new(),
            armed: false,
            ascii: VecDeque::new(),
            auto_publish: None,
            last_publish: Instant::now(),
        };
        let thread = thread::Builder::new()
            .name(format!("pmacEmu{}", card))
            .spawn(move || device.run(rx));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("failed to start pmac{} emulator thread: {}", card, e);
                None
            }
        };
        info!("pmac{} emulator powered on", card);
        Self {
            shared,
            events: tx,
            running,
            thread,
        }
    }

    pub fn card(&self) -> usize {
        self.shared.card
    }

    pub fn dpram(&self) -> SharedDpram {
        self.shared.dpram.clone()
    }

    pub fn mailbox(&self) -> Arc<EmulatedMailbox> {
        self.shared.mailbox.clone()
    }

    /// Connects the interrupt lines to the host.
    pub fn attach(&self, sink: Arc<dyn InterruptSink>) {
        *self.shared.sink.lock().unwrap() = Some(sink);
    }

    /// Stores `value` in controller memory outside DPRAM.
    pub fn set_memory(&self, region: Region, address: u32, value: Value) {
        self.shared.memory.lock().unwrap().set(region, address, value);
    }

    /// Writes `value` straight into a DPRAM word, as the controller's own
    /// servo and background tasks do.
    pub fn write_dpram(&self, region: Region, address: u32, value: Value) {
        let Some(word) = address.checked_sub(DPRAM_BASE) else {
            warn!("{:#x} is not a DPRAM address", address);
            return;
        };
        let mut ofs = 4 * word as usize;
        if region == Region::HX {
            ofs += 2;
        }
        let mut bytes = encode(region, value);
        if matches!(region, Region::HX | Region::HY) {
            bytes.truncate(2);
        }
        self.shared.dpram.write(ofs, &bytes);
    }

    /// Flags the motor fixed buffer as updated.
    pub fn publish_motor(&self) {
        let dpram = &self.shared.dpram;
        dpram.put16(MOTOR_READY, dpram.get16(MOTOR_READY) | MOTOR_READY_BIT);
    }

    /// Flags the background fixed buffer as updated.
    pub fn publish_background(&self) {
        self.shared
            .dpram
            .put16(BACKGROUND_READY, BACKGROUND_READY_BIT);
    }

    /// Gathers the variable buffer and stamps it. Returns the number of
    /// entries copied.
    pub fn publish_variables(&self) -> usize {
        self.shared.publish_variables()
    }

    /// Time stamp of the most recent variable buffer.
    pub fn timestamp(&self) -> u32 {
        self.shared.timestamp.load(Ordering::SeqCst)
    }

    /// Publishes all three buffers every `period`, whenever the host has
    /// consumed the previous ones.
    pub fn set_auto_publish(&self, period: Option<Duration>) {
        let _ = self.events.send(Event::AutoPublish(period));
    }

    /// Runs one command through the responder, bypassing the host
    /// interfaces.
    pub fn command(&self, command: &str) -> crate::responder::Response {
        self.shared.respond(command)
    }
}

impl Drop for EmulatedPmac {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.send(Event::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Device {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    command: Vec<u8>,
    frames: VecDeque<MailboxFrame>,
    armed: bool,
    ascii: VecDeque<AsciiFrame>,
    auto_publish: Option<Duration>,
    last_publish: Instant,
}

impl Device {
    fn run(&mut self, rx: Receiver<Event>) {
        while self.running.load(Ordering::SeqCst) {
            match rx.recv_timeout(TICK) {
                Ok(Event::Chunk(chunk)) => self.on_chunk(&chunk),
                Ok(Event::Strobe) => self.on_strobe(),
                Ok(Event::AutoPublish(period)) => self.auto_publish = period,
                Ok(Event::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.service_ascii();
            self.service_publish();
        }
        debug!("pmac{} emulator stopped", self.shared.card);
    }

    fn on_chunk(&mut self, chunk: &[u8]) {
        if self.command.is_empty() {
            self.frames.clear();
            self.armed = false;
        }
        let mut complete = false;
        for &b in chunk {
            if b == TERM_CR {
                complete = true;
                break;
            }
            self.command.push(b);
        }
        raise(&self.shared.sink, Interrupt::MbxReceipt);
        if !complete {
            return;
        }
        let command = String::from_utf8_lossy(&self.command).into_owned();
        self.command.clear();
        let response = self.shared.respond(&command);
        self.frames = mailbox_frames(&response).into();
        if self.armed {
            self.deliver();
        }
    }

    fn on_strobe(&mut self) {
        if self.frames.is_empty() {
            self.armed = true;
        } else {
            self.deliver();
        }
    }

    fn deliver(&mut self) {
        self.armed = false;
        if let Some(frame) = self.frames.pop_front() {
            self.shared.mailbox.load(&frame);
            raise(&self.shared.sink, Interrupt::MbxReadme);
        }
    }

    fn service_ascii(&mut self) {
        let dpram = &self.shared.dpram;
        if dpram.get8(ASCII_OUT_CONTROL) == 1 {
            let mut line = vec![0u8; ASCII_OUT_LEN];
            dpram.read(ASCII_OUT, &mut line);
            let end = line.iter().position(|b| *b == 0).unwrap_or(line.len());
            line.truncate(end);
            dpram.put8(ASCII_OUT_CONTROL, 0);
            let command = String::from_utf8_lossy(&line).into_owned();
            let response = self.shared.respond(&command);
            self.ascii.extend(ascii_frames(&response));
        }
        if self.ascii.is_empty() || dpram.get16(ASCII_IN_CONTROL) != 0 {
            return;
        }
        let Some(frame) = self.ascii.pop_front() else {
            return;
        };
        match frame {
            AsciiFrame::Line(bytes) => {
                dpram.write(ASCII_IN, &bytes);
                dpram.put16(ASCII_IN_LENGTH, bytes.len() as u16 + 1);
                dpram.put16(ASCII_IN_CONTROL, TERM_CR as u16);
            }
            AsciiFrame::Ack => {
                dpram.put16(ASCII_IN_LENGTH, 1);
                dpram.put16(ASCII_IN_CONTROL, TERM_ACK as u16);
            }
            AsciiFrame::Error(code) => {
                dpram.put16(ASCII_IN_LENGTH, 0);
                dpram.put16(ASCII_IN_CONTROL, error_control(code));
            }
        }
        raise(&self.shared.sink, Interrupt::AscReadme);
    }

    fn service_publish(&mut self) {
        let Some(period) = self.auto_publish else {
            return;
        };
        if self.last_publish.elapsed() < period {
            return;
        }
        self.last_publish = Instant::now();
        let dpram = &self.shared.dpram;
        if dpram.get16(MOTOR_READY) & MOTOR_READY_BIT == 0 {
            dpram.put16(MOTOR_READY, dpram.get16(MOTOR_READY) | MOTOR_READY_BIT);
        }
        if dpram.get16(BACKGROUND_READY) == 0 {
            dpram.put16(BACKGROUND_READY, BACKGROUND_READY_BIT);
        }
        if dpram.get16(VARIABLE_READY) & 1 == 0 {
            self.shared.publish_variables();
        }
    }
}
