// Licensed under the Apache-2.0 license

//! Controller memory outside the DPRAM window, and the gathering of it into
//! the background variable buffer.

use log::trace;
use pmac_common::codec;
use pmac_common::consts::dpram::{VARIABLE_SIZE, VARIABLE_TABLE_WORD};
use pmac_common::consts::var_format;
use pmac_common::{Dpram, Region, Value};
use std::collections::BTreeMap;

/// Host byte image of `value` in `region` format: 8 bytes for D and L,
/// 4 otherwise.
pub fn encode(region: Region, value: Value) -> Vec<u8> {
    let mut p = vec![0u8; region.width()];
    match region {
        Region::D => codec::put_d(&mut p, value.long),
        Region::L => codec::put_l(&mut p, value.double),
        _ => {
            // Every other format is writable.
            let _ = codec::put_data(region, &mut p, value);
        }
    }
    p
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Space {
    X,
    Y,
    Long,
}

impl Space {
    fn of(region: Region) -> Space {
        match region {
            Region::X | Region::SX | Region::HX => Space::X,
            Region::D | Region::L => Space::Long,
            _ => Space::Y,
        }
    }
}

/// Sparse PMAC memory, kept as host byte images per address and word view.
#[derive(Debug, Default, Clone)]
pub struct PmacMemory {
    words: BTreeMap<(Space, u32), Vec<u8>>,
}

impl PmacMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at `address` as seen through `region`. Addresses in
    /// the variable buffer table are 16 bits wide, so only the low 16 bits
    /// of `address` matter to the gatherer.
    pub fn set(&mut self, region: Region, address: u32, value: Value) {
        self.words
            .insert((Space::of(region), address & 0xFFFF), encode(region, value));
    }

    fn image(&self, space: Space, address: u32, width: usize) -> Vec<u8> {
        let mut p = self
            .words
            .get(&(space, address))
            .cloned()
            .unwrap_or_default();
        p.resize(width, 0);
        p
    }

    /// Copies every entry of the variable buffer configuration table into
    /// the data area after it. Returns the number of entries.
    pub fn gather(&self, dpram: &dyn Dpram) -> usize {
        let count = dpram.get16(VARIABLE_SIZE) as usize;
        let mut data_ofs = 4 * (VARIABLE_TABLE_WORD + count);
        for i in 0..count {
            let entry = 4 * (VARIABLE_TABLE_WORD + i);
            let address = dpram.get16(entry) as u32;
            let format = dpram.get16(entry + 2);
            let (space, width) = match format {
                var_format::X => (Space::X, 4),
                var_format::L => (Space::Long, 8),
                _ => (Space::Y, 4),
            };
            dpram.write(data_ofs, &self.image(space, address, width));
            trace!("gathered {:?}:{:#x} to {:#x}", space, address, data_ofs);
            data_ofs += width;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmac_common::SharedDpram;

    #[test]
    fn test_gather_follows_table() {
        let dpram = SharedDpram::new();
        let table = 4 * VARIABLE_TABLE_WORD;
        dpram.put16(table, 0xC000);
        dpram.put16(table + 2, var_format::L);
        dpram.put16(table + 4, 0x0010);
        dpram.put16(table + 6, var_format::X);
        dpram.put16(VARIABLE_SIZE, 2);

        let mut mem = PmacMemory::new();
        mem.set(Region::L, 0xC000, Value::from_double(123.5));
        mem.set(Region::Y, 0x0010, Value::from_long(7));
        mem.set(Region::X, 0x0010, Value::from_long(9));
        assert_eq!(mem.gather(&dpram), 2);

        let data = 4 * (VARIABLE_TABLE_WORD + 2);
        let mut p = [0u8; 8];
        dpram.read(data, &mut p);
        assert_eq!(codec::get_l(&p), 123.5);
        dpram.read(data + 8, &mut p[..4]);
        assert_eq!(codec::get24u(&p), 9);
    }
}
