// Licensed under the Apache-2.0 license

use pmac_common::TransportError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SshError {
    #[error("not connected")]
    NotConnected,
    #[error("invalid port configuration: {0}")]
    Config(&'static str),
    #[error("cannot connect to {host}: {reason}")]
    Connect { host: String, reason: String },
    #[error("authentication as {0} failed")]
    Auth(String),
    #[error("channel I/O error: {0}")]
    Io(String),
    #[error("no bytes were written")]
    NothingWritten,
    #[error("echo incomplete after {elapsed_ms} ms: got {echoed} of {expected} bytes")]
    WriteTimeout {
        elapsed_ms: u64,
        echoed: usize,
        expected: usize,
    },
    /// Carries whatever arrived before the deadline.
    #[error("terminator {term:#04x} not seen, {} bytes read", .partial.len())]
    ReadTimeout { term: u8, partial: Vec<u8> },
    #[error("no {0:?} after 10 attempts")]
    SyncFailed(String),
}

impl From<io::Error> for SshError {
    fn from(e: io::Error) -> Self {
        SshError::Io(e.to_string())
    }
}

impl From<SshError> for TransportError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::NotConnected => TransportError::NotConnected,
            SshError::WriteTimeout { .. } => TransportError::Timeout("ssh echo"),
            SshError::ReadTimeout { .. } => TransportError::Timeout("ssh reply"),
            SshError::Config(_)
            | SshError::Connect { .. }
            | SshError::Auth(_)
            | SshError::SyncFailed(_) => TransportError::Connect(e.to_string()),
            SshError::Io(_) | SshError::NothingWritten => TransportError::Io(e.to_string()),
        }
    }
}
