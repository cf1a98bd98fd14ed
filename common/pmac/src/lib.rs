// Licensed under the Apache-2.0 license

//! Register-level building blocks shared by the PMAC driver, the Power PMAC
//! SSH port and the controller emulator.

pub mod codec;
pub mod consts;
pub mod dpram;
pub mod mailbox;
pub mod shell;
pub mod transport;

pub use codec::{Region, Value};
pub use dpram::{Dpram, SharedDpram};
pub use mailbox::{Interrupt, InterruptSink, MailboxRegisters, Terminator};
pub use shell::ShellChannel;
pub use transport::{MailboxTransport, Reply, TransportError};
