// Licensed under the Apache-2.0 license

//! Fixed hardware constants of the PMAC VME interface.

use std::time::Duration;

pub const MAX_CONTROLLERS: usize = 8;

/// Highest legal PMAC memory address.
pub const PMAC_MEM_SIZE: u32 = 0x7B31F;
/// PMAC address of the first dual-ported RAM word.
pub const DPRAM_BASE: u32 = 0x60000;
/// Number of PMAC words mapped into DPRAM.
pub const DPRAM_WORDS: u32 = 0x1000;
/// Host bytes backing the DPRAM window (one 32-bit slot per PMAC word).
pub const DPRAM_SIZE: usize = 4 * DPRAM_WORDS as usize;

pub const MBX_OUT_BUFLEN: usize = 80;
pub const MBX_IN_BUFLEN: usize = 80;
pub const MBX_ERR_BUFLEN: usize = 10;
pub const MBX_QUEUE_SIZE: usize = 1000;

pub const MAX_MOTOR_SLOTS: usize = 256;
pub const MAX_BACKGROUND_SLOTS: usize = 314;
pub const MAX_VARIABLE_SLOTS: usize = 128;
pub const MAX_OPEN_SLOTS: usize = 480;
pub const MAX_TIMESTAMP_SLOTS: usize = 1;

/// Semaphore timeout of the reference hardware: 3600 ticks at 60 Hz.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

pub const MOTOR_SCAN_PERIOD: Duration = Duration::from_micros(16_667);
pub const BACKGROUND_SCAN_PERIOD: Duration = Duration::from_millis(100);
pub const VARIABLE_SCAN_PERIOD: Duration = Duration::from_millis(100);

/// Host byte offsets of the DPRAM control words.
pub mod dpram {
    pub const MOTOR_READY: usize = 0x06E;
    pub const MOTOR_MASK_LO: usize = 0x070;
    pub const MOTOR_MASK_HI: usize = 0x072;
    pub const BACKGROUND_MAX_CS: usize = 0x674;
    pub const BACKGROUND_READY: usize = 0x67A;
    pub const VARIABLE_READY: usize = 0x1044;
    pub const VARIABLE_SIZE: usize = 0x1048;
    pub const VARIABLE_START: usize = 0x104A;
    /// PMAC word index where the variable buffer configuration table starts.
    pub const VARIABLE_TABLE_WORD: usize = 0x540;
    /// Value written to `VARIABLE_START` (0x540 = 0x450 + 0xF0).
    pub const VARIABLE_START_OFFSET: u16 = 0xF0;

    pub const ASCII_OUT_CONTROL: usize = 0x0E9C;
    pub const ASCII_OUT: usize = 0x0EA0;
    pub const ASCII_OUT_LEN: usize = 160;
    pub const ASCII_IN_CONTROL: usize = 0x0F40;
    pub const ASCII_IN_LENGTH: usize = 0x0F42;
    pub const ASCII_IN: usize = 0x0F44;
    pub const ASCII_IN_LEN: usize = 256;

    pub const MOTOR_READY_BIT: u16 = 0x8000;
    pub const BACKGROUND_READY_BIT: u16 = 0x8000;
    pub const VARIABLE_READY_BIT: u16 = 0x0001;
}

/// Variable buffer format codes written into the configuration table.
pub mod var_format {
    pub const Y: u16 = 0x00;
    pub const L: u16 = 0x10;
    pub const X: u16 = 0x20;
}
