/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Library interface for the PMAC emulator station.

--*/

mod station;

pub use station::{EmulatedConnector, PmacEmulatorArgs, Station};
