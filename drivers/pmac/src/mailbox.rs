// Licensed under the Apache-2.0 license

//! ASCII command/response protocol over the 16 VME mailbox registers.
//!
//! A command is sent in chunks of up to 15 characters. The first character
//! of each chunk goes to register 0 and is written last, because that write
//! is what makes the controller latch the chunk. The controller raises the
//! receipt interrupt once it has taken the chunk. Responses come back one
//! frame of up to 16 registers at a time; the host asks for each frame by
//! clearing register 1 and the controller raises the readme interrupt when
//! the frame is ready.

use crate::sync::Semaphore;
use log::{debug, error, trace, warn};
use pmac_common::consts::{MBX_ERR_BUFLEN, MBX_IN_BUFLEN, MBX_OUT_BUFLEN, WAIT_TIMEOUT};
use pmac_common::mailbox::{MBX_READ_STROBE, MBX_REGS_IN, MBX_REGS_OUT, TERM_CR};
use pmac_common::{
    Interrupt, InterruptSink, MailboxRegisters, MailboxTransport, Reply, Terminator,
    TransportError,
};
use smlang::statemachine;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of the mailbox registers taken after a readme interrupt.
pub type Frame = [u8; MBX_REGS_IN];

statemachine! {
    derive_states: [Debug, Clone, Copy],
    derive_events: [Clone, Debug],
    transitions: {
        *Idle + Start / on_start = Sending,
        Sending + WriteChunk / on_write_chunk = AwaitingReceipt,
        AwaitingReceipt + Receipt [has_more_chunks] = Sending,
        AwaitingReceipt + Receipt [!has_more_chunks] = AwaitingResponse,
        AwaitingResponse + Readme(Frame) [is_error_frame] / on_error_frame = ErrorFraming,
        AwaitingResponse + Readme(Frame) [is_final_frame] / on_final_frame = Idle,
        AwaitingResponse + Readme(Frame) [is_partial_frame] / on_partial_frame = AwaitingResponse,
        ErrorFraming + Finish = Idle,
        _ + Abort = Idle
    }
}

/// Register writes for one command chunk, in the order they must happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub writes: Vec<(usize, u8)>,
    /// The chunk carries the command's terminating CR.
    pub last: bool,
}

/// Splits `command` into mailbox chunks.
///
/// Characters 1..15 of a chunk go to registers 2..16. When the chunk ends
/// inside the registers a CR follows it and the chunk is the last one. An
/// empty remainder is sent as a lone CR in register 0.
pub fn chunk_command(command: &[u8]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut rest = command;
    loop {
        let len = rest.len();
        let mut writes = Vec::with_capacity(MBX_REGS_OUT + 1);
        for (k, &c) in rest.iter().enumerate().take(MBX_REGS_OUT).skip(1) {
            writes.push((k + 1, c));
        }
        let last = len < MBX_REGS_OUT;
        let first = if len == 0 {
            TERM_CR
        } else {
            if last {
                writes.push((len + 1, TERM_CR));
            }
            rest[0]
        };
        writes.push((0, first));
        chunks.push(Chunk { writes, last });
        if last {
            return chunks;
        }
        rest = &rest[MBX_REGS_OUT..];
    }
}

/// What one response frame holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameScan {
    /// Bytes ahead of the terminator.
    pub text: Vec<u8>,
    pub terminator: Option<Terminator>,
    /// Bytes between a BELL and the following CR.
    pub error: Vec<u8>,
}

/// Scans a frame up to its first terminator. After a BELL the bytes up to
/// the next CR in the same frame are the error message.
pub fn scan_frame(frame: &Frame) -> FrameScan {
    let mut scan = FrameScan::default();
    let mut bytes = frame.iter().copied();
    for c in bytes.by_ref() {
        if let Some(t) = Terminator::from_byte(c) {
            scan.terminator = Some(t);
            break;
        }
        scan.text.push(c);
    }
    if scan.terminator == Some(Terminator::Bell) {
        scan.error.extend(bytes.take_while(|&c| c != TERM_CR));
    }
    scan
}

/// Per-transaction context driven by the protocol state machine.
pub struct MailboxContext {
    card: usize,
    regs: Arc<dyn MailboxRegisters>,
    chunks: Vec<Chunk>,
    next_chunk: usize,
    response: Vec<u8>,
    error_message: Vec<u8>,
    first_line_done: bool,
    terminator: Option<Terminator>,
}

impl MailboxContext {
    fn new(card: usize, regs: Arc<dyn MailboxRegisters>, command: &str) -> Self {
        Self {
            card,
            regs,
            chunks: chunk_command(command.as_bytes()),
            next_chunk: 0,
            response: Vec::new(),
            error_message: Vec::new(),
            first_line_done: false,
            terminator: None,
        }
    }

    fn accept(&mut self, frame: &Frame) -> FrameScan {
        let scan = scan_frame(frame);
        trace!("mailbox {} frame {:02x?}", self.card, frame);
        if !self.first_line_done {
            let room = (MBX_IN_BUFLEN - 1).saturating_sub(self.response.len());
            if scan.text.len() > room {
                warn!(
                    "PMAC MBX response truncated to {} characters, controller: {}",
                    MBX_IN_BUFLEN - 1,
                    self.card
                );
            }
            self.response.extend(scan.text.iter().copied().take(room));
            if scan.terminator.is_some() {
                self.first_line_done = true;
            }
        }
        if scan.terminator.is_some() {
            self.terminator = scan.terminator;
        }
        scan
    }

    fn reply(&self) -> Result<Reply, TransportError> {
        let terminator = self
            .terminator
            .ok_or(TransportError::Protocol("response without terminator"))?;
        Ok(Reply {
            response: String::from_utf8_lossy(&self.response).into_owned(),
            terminator,
            error_message: String::from_utf8_lossy(&self.error_message).into_owned(),
        })
    }
}

impl StateMachineContext for MailboxContext {
    fn on_start(&mut self) -> Result<(), ()> {
        self.next_chunk = 0;
        Ok(())
    }

    fn on_write_chunk(&mut self) -> Result<(), ()> {
        let chunk = self.chunks.get(self.next_chunk).ok_or(())?;
        for &(index, value) in &chunk.writes {
            self.regs.write(index, value);
        }
        self.next_chunk += 1;
        Ok(())
    }

    fn has_more_chunks(&self) -> Result<bool, ()> {
        Ok(self.next_chunk < self.chunks.len())
    }

    fn is_error_frame(&self, frame: &Frame) -> Result<bool, ()> {
        Ok(scan_frame(frame).terminator == Some(Terminator::Bell))
    }

    fn is_final_frame(&self, frame: &Frame) -> Result<bool, ()> {
        Ok(scan_frame(frame).terminator == Some(Terminator::Ack))
    }

    fn is_partial_frame(&self, frame: &Frame) -> Result<bool, ()> {
        Ok(matches!(scan_frame(frame).terminator, None | Some(Terminator::Cr)))
    }

    fn on_error_frame(&mut self, frame: Frame) -> Result<(), ()> {
        let scan = self.accept(&frame);
        self.error_message = scan.error;
        self.error_message.truncate(MBX_ERR_BUFLEN - 1);
        Ok(())
    }

    fn on_final_frame(&mut self, frame: Frame) -> Result<(), ()> {
        self.accept(&frame);
        Ok(())
    }

    fn on_partial_frame(&mut self, frame: Frame) -> Result<(), ()> {
        self.accept(&frame);
        Ok(())
    }
}

/// Timeouts of one mailbox transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxTimeouts {
    pub lock: Duration,
    pub receipt: Duration,
    pub readme: Duration,
}

impl Default for MailboxTimeouts {
    fn default() -> Self {
        Self {
            lock: WAIT_TIMEOUT,
            receipt: WAIT_TIMEOUT,
            readme: WAIT_TIMEOUT,
        }
    }
}

/// Mailbox driver of one VME controller.
pub struct VmeMailbox {
    card: usize,
    regs: Arc<dyn MailboxRegisters>,
    lock: Semaphore,
    receipt: Semaphore,
    readme: Semaphore,
    timeouts: MailboxTimeouts,
}

impl VmeMailbox {
    pub fn new(card: usize, regs: Arc<dyn MailboxRegisters>, timeouts: MailboxTimeouts) -> Self {
        Self {
            card,
            regs,
            lock: Semaphore::binary_full(),
            receipt: Semaphore::binary(),
            readme: Semaphore::binary(),
            timeouts,
        }
    }

    fn step(
        &self,
        sm: &mut StateMachine<MailboxContext>,
        event: Events,
        what: &'static str,
    ) -> Result<(), TransportError> {
        let result = sm.process_event(event).map(|_| ());
        if let Err(e) = result {
            error!(
                "PMAC MBX {} rejected in state {:?}: {:?}, controller: {}",
                what,
                sm.state(),
                e,
                self.card
            );
            return Err(TransportError::Protocol(what));
        }
        Ok(())
    }

    fn run(&self, command: &str) -> Result<Reply, TransportError> {
        let mut sm = StateMachine::new(MailboxContext::new(self.card, self.regs.clone(), command));
        self.step(&mut sm, Events::Start, "start")?;
        loop {
            match *sm.state() {
                States::Sending => {
                    self.receipt.clear();
                    self.step(&mut sm, Events::WriteChunk, "chunk")?;
                }
                States::AwaitingReceipt => {
                    if !self.receipt.take(Some(self.timeouts.receipt)) {
                        error!("PMAC MBX RECEIPT FAILED, controller: {}", self.card);
                        let _ = sm.process_event(Events::Abort);
                        return Err(TransportError::Timeout("mailbox receipt"));
                    }
                    self.step(&mut sm, Events::Receipt, "receipt")?;
                }
                States::AwaitingResponse => {
                    self.readme.clear();
                    self.regs.write(MBX_READ_STROBE, 0);
                    if !self.readme.take(Some(self.timeouts.readme)) {
                        error!("PMAC MBX README FAILED, controller: {}", self.card);
                        let _ = sm.process_event(Events::Abort);
                        return Err(TransportError::Timeout("mailbox readme"));
                    }
                    let mut frame: Frame = [0; MBX_REGS_IN];
                    for (i, b) in frame.iter_mut().enumerate() {
                        *b = self.regs.read(i);
                    }
                    self.step(&mut sm, Events::Readme(frame), "readme")?;
                }
                States::ErrorFraming => {
                    debug!("PMAC MBX error response, controller: {}", self.card);
                    self.step(&mut sm, Events::Finish, "finish")?;
                }
                States::Idle => break,
            }
        }
        sm.context().reply()
    }
}

impl MailboxTransport for VmeMailbox {
    fn write_read(&self, command: &str) -> Result<Reply, TransportError> {
        if command.len() >= MBX_OUT_BUFLEN {
            return Err(TransportError::CommandTooLong(command.len()));
        }
        let _guard = self.lock.lock(Some(self.timeouts.lock)).ok_or_else(|| {
            error!("PMAC MBX LOCK FAILED, controller: {}", self.card);
            TransportError::Timeout("mailbox lock")
        })?;
        debug!("PMAC MBX {} command [{}]", self.card, command);
        let reply = self.run(command)?;
        debug!(
            "PMAC MBX {} response [{}] {:?} {}",
            self.card, reply.response, reply.terminator, reply.error_message
        );
        Ok(reply)
    }
}

impl InterruptSink for VmeMailbox {
    fn raise(&self, irq: Interrupt) {
        match irq {
            Interrupt::MbxReceipt => self.receipt.give(),
            Interrupt::MbxReadme => self.readme.give(),
            Interrupt::AscReadme => {}
        }
    }
}
