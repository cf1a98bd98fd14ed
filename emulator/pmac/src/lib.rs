/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Simulated Delta Tau PMAC controllers for driver tests and the emulator
    binary: a VME PMAC with DPRAM and mailbox, and a Power PMAC shell.

--*/

mod frames;
mod memory;
mod pmac;
mod responder;
mod shell;

pub use frames::{ascii_frames, error_control, mailbox_frames, AsciiFrame, MailboxFrame};
pub use memory::PmacMemory;
pub use pmac::{EmulatedMailbox, EmulatedPmac};
pub use responder::{Responder, Response, VariableStore, ERR_SYNTAX};
pub use shell::EmulatedShell;
