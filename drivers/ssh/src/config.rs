// Licensed under the Apache-2.0 license

use crate::error::SshError;
use serde::{Deserialize, Serialize};

fn default_timeout_ms() -> u64 {
    2000
}

/// Where and how to log in to a Power PMAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshPortConfig {
    pub host: String,
    pub username: String,
    /// Public key authentication with `~/.ssh/id_rsa` when absent.
    #[serde(default)]
    pub password: Option<String>,
    /// Bound on each command's echo and reply.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Count echo anomalies; see `SshClient::report`.
    #[serde(default)]
    pub error_checking: bool,
}

impl SshPortConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: None,
            timeout_ms: default_timeout_ms(),
            error_checking: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.is_empty() {
            return Err(SshError::Config("host name missing"));
        }
        if self.username.is_empty() {
            return Err(SshError::Config("user name missing"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(SshPortConfig::new("ppmac", "root").validate().is_ok());
        assert_eq!(
            SshPortConfig::new("ppmac", "").validate(),
            Err(SshError::Config("user name missing"))
        );
        assert_eq!(
            SshPortConfig::new("", "root").with_password("deltatau").validate(),
            Err(SshError::Config("host name missing"))
        );
    }
}
