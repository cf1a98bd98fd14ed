// Licensed under the Apache-2.0 license

use crate::address::ScanBuffer;
use pmac_common::codec::CodecError;
use pmac_common::{Region, TransportError};
use thiserror::Error;

/// Failures while turning a symbolic address into a registered slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("improper address specification: {0:?}")]
    ImproperSpec(String),
    #[error("invalid region code: {0:?}")]
    InvalidRegionCode(String),
    #[error("address {0:#x} out of range")]
    AddressOutOfRange(u64),
    #[error("{0:?} scan table is full")]
    TableFull(ScanBuffer),
    #[error("controller {0} has no dual-ported RAM")]
    NoDpram(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("controller number {0} invalid, must be 0 to {max}", max = pmac_common::consts::MAX_CONTROLLERS - 1)]
    InvalidIndex(usize),
    #[error("controller {0} already configured")]
    AlreadyConfigured(usize),
    #[error("configuration is locked after startup")]
    Locked,
    #[error("controller {0} is not configured")]
    NotConfigured(usize),
    #[error("variable buffer cannot carry {0} data")]
    UnsupportedVariableFormat(Region),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("slot {index} of the {buffer:?} table does not exist")]
    NoSuchSlot { buffer: ScanBuffer, index: usize },
    #[error("operation requires an open-range slot")]
    NotOpenSlot,
    #[error("mailbox is disabled on controller {0}")]
    MailboxDisabled(usize),
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, String),
}

/// Failures of the file-style device shim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no such device: {0}")]
    NoSuchDevice(String),
    #[error("device {0} is already open")]
    AlreadyOpen(String),
    #[error("device {0} is not open")]
    NotOpen(String),
    #[error("mailbox device requires the mailbox worker to be disabled on controller {0}")]
    MailboxInUse(usize),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
