// Licensed under the Apache-2.0 license

use crate::config::{ControllerConfig, ControllerEntry, DriverConfig};
use crate::controller::{Controller, Transport};
use crate::device::DeviceTable;
use crate::error::{ConfigError, DriverError};
use crate::slot::{Slot, Subscriber};
use log::{error, info, warn};
use pmac_common::consts::MAX_CONTROLLERS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The set of configured controllers. Controllers are added before
/// `startup` and live until the registry is dropped.
pub struct ControllerRegistry {
    controllers: Mutex<Vec<Option<Arc<Controller>>>>,
    locked: AtomicBool,
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self {
            controllers: Mutex::new(vec![None; MAX_CONTROLLERS]),
            locked: AtomicBool::new(false),
        }
    }

    /// Adds controller `index`. Each index can be configured once, and only
    /// before `startup`.
    pub fn configure(
        &self,
        index: usize,
        transport: Transport,
        config: ControllerConfig,
    ) -> Result<Arc<Controller>, ConfigError> {
        if self.locked.load(Ordering::SeqCst) {
            error!("Cannot change configuration after initialization");
            return Err(ConfigError::Locked);
        }
        let mut controllers = self.controllers.lock().unwrap();
        let entry = controllers.get_mut(index).ok_or_else(|| {
            error!("controller number {} invalid", index);
            ConfigError::InvalidIndex(index)
        })?;
        if entry.is_some() {
            error!("controller {} already configured", index);
            return Err(ConfigError::AlreadyConfigured(index));
        }
        let controller = Arc::new(Controller::new(index, transport, config));
        *entry = Some(controller.clone());
        info!("controller {} configured", index);
        Ok(controller)
    }

    /// Configures every controller in `config`, taking each transport from
    /// `connect`, and registers the listed addresses without subscribers.
    pub fn load(
        &self,
        config: &DriverConfig,
        mut connect: impl FnMut(&ControllerEntry) -> Result<Transport, DriverError>,
    ) -> Result<(), DriverError> {
        for entry in &config.controllers {
            let controller = self.configure(entry.index, connect(entry)?, entry.config.clone())?;
            for spec in &entry.addresses {
                controller.register(entry.address_offset, spec, None)?;
            }
        }
        Ok(())
    }

    pub fn controller(&self, index: usize) -> Result<Arc<Controller>, ConfigError> {
        let controllers = self.controllers.lock().unwrap();
        controllers
            .get(index)
            .ok_or(ConfigError::InvalidIndex(index))?
            .clone()
            .ok_or(ConfigError::NotConfigured(index))
    }

    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        self.controllers
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Registers `spec` on controller `card`.
    pub fn register(
        &self,
        card: usize,
        offset: i32,
        spec: &str,
        subscriber: Option<Arc<dyn Subscriber>>,
    ) -> Result<Arc<Slot>, DriverError> {
        self.controller(card)?.register(offset, spec, subscriber)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Locks the configuration and starts every controller's tasks. Runs
    /// once; later calls do nothing.
    pub fn startup(&self) -> Result<(), DriverError> {
        if self.locked.swap(true, Ordering::SeqCst) {
            warn!("driver already started");
            return Ok(());
        }
        for controller in self.controllers() {
            controller.start()?;
        }
        info!("driver started");
        Ok(())
    }

    /// Stops every controller's tasks.
    pub fn shutdown(&self) {
        for controller in self.controllers() {
            controller.stop();
        }
        info!("driver stopped");
    }

    /// Creates the `/dev/pmac/<card>/...` devices for every configured
    /// controller.
    pub fn install_devices(&self, polling: bool) -> Result<DeviceTable, DriverError> {
        let mut table = DeviceTable::default();
        for controller in self.controllers() {
            table.install(&controller, polling)?;
        }
        Ok(table)
    }

    pub fn report(&self, level: u32) -> String {
        let controllers = self.controllers();
        let mut out = String::new();
        out.push_str(&format!(
            "PMAC driver: {} controller(s) configured, {}\n",
            controllers.len(),
            if self.is_locked() { "running" } else { "not started" }
        ));
        if level > 0 {
            for controller in &controllers {
                out.push_str(&controller.report(level));
            }
        }
        out
    }
}
