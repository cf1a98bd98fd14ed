// Licensed under the Apache-2.0 license

use crate::mailbox::Terminator;
use thiserror::Error;

/// Outcome of one command/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response text without its terminator.
    pub response: String,
    pub terminator: Terminator,
    /// Text of a BELL error block (`ERRnnn`), empty otherwise.
    pub error_message: String,
}

impl Reply {
    pub fn ack(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            terminator: Terminator::Ack,
            error_message: String::new(),
        }
    }

    pub fn error(error_message: impl Into<String>) -> Self {
        Self {
            response: String::new(),
            terminator: Terminator::Bell,
            error_message: error_message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.terminator == Terminator::Bell
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("command of {0} bytes does not fit the mailbox buffer")]
    CommandTooLong(usize),
    #[error("not connected")]
    NotConnected,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("protocol state machine rejected {0}")]
    Protocol(&'static str),
}

/// A channel that carries one ASCII command and returns its response,
/// one exchange at a time.
pub trait MailboxTransport: Send + Sync {
    fn write_read(&self, command: &str) -> Result<Reply, TransportError>;
}
