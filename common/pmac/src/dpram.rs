// Licensed under the Apache-2.0 license

use crate::codec;
use crate::consts::DPRAM_SIZE;
use log::error;
use std::sync::{Arc, Mutex};

/// Host view of a controller's dual-ported RAM window.
///
/// Offsets are host byte offsets from the start of the window. Accesses
/// outside the window are logged and ignored (reads return zeros).
pub trait Dpram: Send + Sync {
    fn len(&self) -> usize;

    fn read(&self, offset: usize, buf: &mut [u8]);

    fn write(&self, offset: usize, data: &[u8]);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get16(&self, offset: usize) -> u16 {
        let mut p = [0u8; 2];
        self.read(offset, &mut p);
        codec::get16(&p)
    }

    fn put16(&self, offset: usize, value: u16) {
        let mut p = [0u8; 2];
        codec::put16(&mut p, value);
        self.write(offset, &p);
    }

    fn get8(&self, offset: usize) -> u8 {
        let mut p = [0u8; 1];
        self.read(offset, &mut p);
        p[0]
    }

    fn put8(&self, offset: usize, value: u8) {
        self.write(offset, &[value]);
    }
}

/// DPRAM backed by host memory, shared between the driver and whatever plays
/// the controller side (the emulator, or a test).
#[derive(Clone)]
pub struct SharedDpram {
    pub ram: Arc<Mutex<Vec<u8>>>,
}

impl Default for SharedDpram {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDpram {
    pub fn new() -> Self {
        Self::with_size(DPRAM_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            ram: Arc::new(Mutex::new(vec![0u8; size])),
        }
    }

    /// Runs `f` with the window locked, for multi-word updates that must
    /// look atomic to the other side.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut ram = self.ram.lock().unwrap();
        f(&mut ram)
    }
}

impl Dpram for SharedDpram {
    fn len(&self) -> usize {
        self.ram.lock().unwrap().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let ram = self.ram.lock().unwrap();
        match ram.get(offset..offset + buf.len()) {
            Some(src) => buf.copy_from_slice(src),
            None => {
                error!("DPRAM read of {} bytes at {:#06x} out of range", buf.len(), offset);
                buf.fill(0);
            }
        }
    }

    fn write(&self, offset: usize, data: &[u8]) {
        let mut ram = self.ram.lock().unwrap();
        match ram.get_mut(offset..offset + data.len()) {
            Some(dst) => dst.copy_from_slice(data),
            None => error!(
                "DPRAM write of {} bytes at {:#06x} out of range",
                data.len(),
                offset
            ),
        }
    }
}
