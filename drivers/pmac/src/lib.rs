/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Delta Tau PMAC driver core: address registration, DPRAM scanning,
    mailbox transactions and the request queue that feeds them.

--*/

pub mod address;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod interrupt;
pub mod mailbox;
pub mod pmac_error;
pub mod queue;
pub mod registry;
pub mod scan;
pub mod slot;
pub mod sync;

pub use address::{AddressSpec, ScanBuffer};
pub use config::{ControllerConfig, ControllerEntry, DriverConfig};
pub use controller::{Controller, Transport};
pub use device::{DeviceHandle, DeviceKind, DeviceTable, Ioctl, PmacDevice};
pub use error::{ConfigError, DeviceError, DriverError, ResolveError};
pub use interrupt::InterruptRouter;
pub use mailbox::{MailboxTimeouts, VmeMailbox};
pub use queue::{ErrorSink, MailboxQueue, MailboxRequest, Requester};
pub use registry::ControllerRegistry;
pub use slot::{Slot, Subscriber};
