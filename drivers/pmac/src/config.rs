// Licensed under the Apache-2.0 license

use crate::error::ConfigError;
use crate::mailbox::MailboxTimeouts;
use pmac_common::consts::{BACKGROUND_SCAN_PERIOD, MOTOR_SCAN_PERIOD, VARIABLE_SCAN_PERIOD, WAIT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Per-controller settings. The defaults match the rates and timeouts of
/// the VME hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub mailbox_enabled: bool,
    pub motor_enabled: bool,
    pub background_enabled: bool,
    pub variable_enabled: bool,
    pub motor_period_ms: f64,
    pub background_period_ms: f64,
    pub variable_period_ms: f64,
    /// Bound on the mailbox lock, receipt and readme waits.
    pub mailbox_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mailbox_enabled: true,
            motor_enabled: true,
            background_enabled: true,
            variable_enabled: true,
            motor_period_ms: MOTOR_SCAN_PERIOD.as_secs_f64() * 1000.0,
            background_period_ms: BACKGROUND_SCAN_PERIOD.as_secs_f64() * 1000.0,
            variable_period_ms: VARIABLE_SCAN_PERIOD.as_secs_f64() * 1000.0,
            mailbox_timeout_ms: WAIT_TIMEOUT.as_millis() as u64,
        }
    }
}

fn period(ms: f64) -> Duration {
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

impl ControllerConfig {
    pub fn motor_period(&self) -> Duration {
        period(self.motor_period_ms)
    }

    pub fn background_period(&self) -> Duration {
        period(self.background_period_ms)
    }

    pub fn variable_period(&self) -> Duration {
        period(self.variable_period_ms)
    }

    pub fn mailbox_timeouts(&self) -> MailboxTimeouts {
        let t = Duration::from_millis(self.mailbox_timeout_ms);
        MailboxTimeouts {
            lock: t,
            receipt: t,
            readme: t,
        }
    }
}

/// One `[[controller]]` table of a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerEntry {
    pub index: usize,
    /// Added to every address in `addresses`.
    #[serde(default)]
    pub address_offset: i32,
    /// Symbolic addresses to register at startup.
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(flatten)]
    pub config: ControllerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default, rename = "controller")]
    pub controllers: Vec<ControllerEntry>,
}

impl DriverConfig {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::de::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::parse(&contents)
    }
}
