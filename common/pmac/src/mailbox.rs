// Licensed under the Apache-2.0 license

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of byte-wide mailbox registers.
pub const MBX_REGS: usize = 16;
/// Registers carrying one outbound command chunk (register 1 is skipped).
pub const MBX_REGS_OUT: usize = 15;
/// Registers scanned for one inbound response frame.
pub const MBX_REGS_IN: usize = 16;
/// Register the host clears to ask for the next response frame.
pub const MBX_READ_STROBE: usize = 1;

pub const TERM_ACK: u8 = 0x06;
pub const TERM_BELL: u8 = 0x07;
pub const TERM_CR: u8 = 0x0D;

/// Byte that ends a mailbox response and encodes its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Terminator {
    /// Response complete, nothing more follows.
    Ack = TERM_ACK,
    /// Error block follows up to the next CR.
    Bell = TERM_BELL,
    /// End of one response line; more may follow.
    Cr = TERM_CR,
}

impl Terminator {
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::try_from(b).ok()
    }
}

/// The 16 mailbox registers of a VME PMAC.
pub trait MailboxRegisters: Send + Sync {
    fn read(&self, index: usize) -> u8;

    fn write(&self, index: usize, value: u8);
}

/// Interrupts a PMAC raises towards the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    /// The controller latched the command chunk written to the mailbox.
    MbxReceipt,
    /// The mailbox registers hold a response frame.
    MbxReadme,
    /// The DPRAM ASCII input buffer holds a response line.
    AscReadme,
}

/// Receiver of controller interrupts; the controller side calls `raise` from
/// its own thread.
pub trait InterruptSink: Send + Sync {
    fn raise(&self, irq: Interrupt);
}
