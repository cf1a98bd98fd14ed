// Licensed under the Apache-2.0 license

//! Symbolic PMAC address parsing and scan buffer classification.

use crate::error::ResolveError;
use pmac_common::consts::{
    DPRAM_BASE, DPRAM_SIZE, DPRAM_WORDS, MAX_BACKGROUND_SLOTS, MAX_MOTOR_SLOTS, MAX_OPEN_SLOTS,
    MAX_TIMESTAMP_SLOTS, MAX_VARIABLE_SLOTS, PMAC_MEM_SIZE,
};
use pmac_common::Region;
use std::fmt;

/// Offsets of the scan buffer boundaries from `DPRAM_BASE`.
const MOTOR_START: u32 = 0x1A;
const MOTOR_END: u32 = 0x19D;
const MOTOR_FIRST_AXIS: u32 = 0x1D;
const MOTOR_AXIS_STRIDE: u32 = 0xC;
const BACKGROUND_START: u32 = 0x19E;
const BACKGROUND_END: u32 = 0x3A7;
const BACKGROUND_FIRST_CS: i64 = 0x1A7;
const BACKGROUND_CS_STRIDE: i64 = 0x20;
const TIMESTAMP: u32 = 0x411;

/// The five fixed-capacity tables a registered address can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanBuffer {
    /// Motor fixed data reporting buffer.
    Motor,
    /// Background fixed data reporting buffer (coordinate systems).
    Background,
    /// Background variable buffer: PMAC memory outside DPRAM, gathered by
    /// the controller into DPRAM.
    Variable,
    /// Time stamp of the variable buffer.
    Timestamp,
    /// Any other DPRAM word, accessed on demand.
    Open,
}

impl ScanBuffer {
    pub const ALL: [ScanBuffer; 5] = [
        ScanBuffer::Motor,
        ScanBuffer::Background,
        ScanBuffer::Variable,
        ScanBuffer::Timestamp,
        ScanBuffer::Open,
    ];

    pub fn capacity(self) -> usize {
        match self {
            ScanBuffer::Motor => MAX_MOTOR_SLOTS,
            ScanBuffer::Background => MAX_BACKGROUND_SLOTS,
            ScanBuffer::Variable => MAX_VARIABLE_SLOTS,
            ScanBuffer::Timestamp => MAX_TIMESTAMP_SLOTS,
            ScanBuffer::Open => MAX_OPEN_SLOTS,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ScanBuffer::Motor => 0,
            ScanBuffer::Background => 1,
            ScanBuffer::Variable => 2,
            ScanBuffer::Timestamp => 3,
            ScanBuffer::Open => 4,
        }
    }
}

/// A parsed `<REGION>:$<hex>` specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpec {
    pub region: Region,
    pub address: u32,
}

impl AddressSpec {
    pub fn parse(spec: &str) -> Result<Self, ResolveError> {
        let (code, rest) = spec
            .split_once(':')
            .ok_or_else(|| ResolveError::ImproperSpec(spec.to_string()))?;
        let hex = rest
            .strip_prefix('$')
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ResolveError::ImproperSpec(spec.to_string()))?;
        let address = u64::from_str_radix(hex, 16)
            .map_err(|_| ResolveError::ImproperSpec(spec.to_string()))?;
        let region = Region::from_code(code)
            .ok_or_else(|| ResolveError::InvalidRegionCode(code.to_string()))?;
        if address > PMAC_MEM_SIZE as u64 {
            return Err(ResolveError::AddressOutOfRange(address));
        }
        Ok(Self {
            region,
            address: address as u32,
        })
    }

    /// Applies a base address offset; the result must still be a legal
    /// PMAC address.
    pub fn offset_by(self, offset: i32) -> Result<Self, ResolveError> {
        let address = self.address as i64 + offset as i64;
        if !(0..=PMAC_MEM_SIZE as i64).contains(&address) {
            return Err(ResolveError::AddressOutOfRange(address as u64));
        }
        Ok(Self {
            address: address as u32,
            ..self
        })
    }

    pub fn buffer(&self) -> ScanBuffer {
        classify(self.address)
    }

    /// Host byte offset of the value inside the DPRAM window, when the
    /// address lives in DPRAM.
    pub fn host_offset(&self) -> Option<usize> {
        host_offset(self.region, self.address)
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:${:X}", self.region, self.address)
    }
}

/// Picks the scan buffer for a PMAC address. Total over `0..=PMAC_MEM_SIZE`.
pub fn classify(address: u32) -> ScanBuffer {
    if !(DPRAM_BASE..DPRAM_BASE + DPRAM_WORDS).contains(&address) {
        return ScanBuffer::Variable;
    }
    let ofs = address - DPRAM_BASE;
    if ofs == TIMESTAMP {
        ScanBuffer::Timestamp
    } else if (MOTOR_START..MOTOR_END).contains(&ofs) {
        ScanBuffer::Motor
    } else if (BACKGROUND_START..BACKGROUND_END).contains(&ofs) {
        ScanBuffer::Background
    } else {
        ScanBuffer::Open
    }
}

/// `4 * (address - DPRAM_BASE)`, plus 2 for the high half of an X word.
/// `None` when the value would not fit inside the DPRAM window.
pub fn host_offset(region: Region, address: u32) -> Option<usize> {
    let word = address.checked_sub(DPRAM_BASE)? as usize;
    let mut ofs = 4 * word;
    if region == Region::HX {
        ofs += 2;
    }
    if ofs + region.width() > DPRAM_SIZE {
        return None;
    }
    Some(ofs)
}

/// Motor mask word and bit enabled by registering `address`, if any.
pub fn motor_mask_bit(address: u32) -> Option<(usize, u16)> {
    use pmac_common::consts::dpram::{MOTOR_MASK_HI, MOTOR_MASK_LO};
    let first = DPRAM_BASE + MOTOR_FIRST_AXIS;
    if address < first {
        return None;
    }
    let n = (address - first) / MOTOR_AXIS_STRIDE;
    if n < 16 {
        Some((MOTOR_MASK_LO, 1 << n))
    } else {
        Some((MOTOR_MASK_HI, 1 << (n - 16)))
    }
}

/// Coordinate system number referenced by a background buffer address.
/// Truncates toward zero, so the words ahead of the first coordinate
/// system block count as coordinate system 0.
pub fn background_cs(address: u32) -> i64 {
    (address as i64 - DPRAM_BASE as i64 - BACKGROUND_FIRST_CS) / BACKGROUND_CS_STRIDE
}
