// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use log::LevelFilter;
use pmac_common::ShellChannel;
use pmac_emulator::EmulatedShell;
use pmac_ssh::{Connector, SshError, SshPortConfig};
use simple_logger::SimpleLogger;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_logger() {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

/// Hands out emulated Power PMAC shells.
#[derive(Default, Clone)]
pub struct ShellConnector {
    pub connects: Arc<AtomicUsize>,
}

impl ShellConnector {
    pub fn count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for ShellConnector {
    type Channel = EmulatedShell;

    fn connect(&mut self, config: &SshPortConfig) -> Result<EmulatedShell, SshError> {
        if config.host == "unreachable" {
            return Err(SshError::Connect {
                host: config.host.clone(),
                reason: "no route to host".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(EmulatedShell::new())
    }
}

/// Passes at most one byte per read through.
pub struct Trickle<C>(pub C);

impl<C: ShellChannel> ShellChannel for Trickle<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(1);
        self.0.read(&mut buf[..n])
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
}
