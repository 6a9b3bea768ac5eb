//! Physical-page-aware writes over a raw memory device
//!
//! Serial EEPROMs accept at most one physical page per write and need a
//! settle period (the internal write cycle) before the next transaction.
//! [`PageStore`] owns both constraints: it splits buffers on page
//! boundaries and blocks for the write-cycle delay after every physical
//! write. Skipping the delay corrupts the part, so it applies to the test
//! double as much as to real hardware.

use crate::common::Result;
use crate::storage::device::MemoryDevice;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fill byte used by [`PageStore::wipe`]
///
/// The provisioned format blanks storage with ASCII `'0'`, not 0x00; the
/// schema layer's empty-slot sentinels compare against runs of this byte.
pub const WIPE_FILL: u8 = b'0';

/// Physical geometry and timing of the part
///
/// Defaults describe a 32 KiB serial EEPROM: 512 pages of 64 bytes with a
/// 5 ms internal write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    /// Number of physical pages
    pub pages: usize,
    /// Physical page size in bytes (the write-atomicity unit)
    pub bytes_per_page: usize,
    /// Internal write-cycle time in milliseconds
    pub write_cycle_ms: u64,
}

impl Default for DeviceGeometry {
    fn default() -> Self {
        Self {
            pages: 512,
            bytes_per_page: 64,
            write_cycle_ms: 5,
        }
    }
}

impl DeviceGeometry {
    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.pages * self.bytes_per_page
    }

    /// Write-cycle time as a [`Duration`]
    pub fn write_cycle(&self) -> Duration {
        Duration::from_millis(self.write_cycle_ms)
    }
}

/// Page-aware view of a raw memory device
pub struct PageStore<D: MemoryDevice> {
    device: D,
    geometry: DeviceGeometry,
}

impl<D: MemoryDevice> PageStore<D> {
    /// Wrap a device with the given geometry
    pub fn new(device: D, geometry: DeviceGeometry) -> Self {
        Self { device, geometry }
    }

    /// Storage capacity in bytes
    pub fn capacity(&self) -> usize {
        self.geometry.capacity()
    }

    /// The physical geometry this store was built with
    pub fn geometry(&self) -> DeviceGeometry {
        self.geometry
    }

    /// Access the underlying device (test inspection)
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the underlying device (test fault injection)
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Read `len` bytes starting at `addr`
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn read(&mut self, addr: usize, len: usize) -> Result<Vec<u8>> {
        self.device.read(addr, len)
    }

    /// Write `buf` starting at `addr`, splitting on physical page boundaries
    ///
    /// An unaligned start writes a head chunk up to the next boundary, then
    /// successive page-sized chunks. Every physical write is followed by a
    /// blocking wait for the device's write cycle; issuing another
    /// transaction earlier corrupts the part.
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn write(&mut self, addr: usize, buf: &[u8]) -> Result<()> {
        let bpp = self.geometry.bytes_per_page;
        let offset = addr % bpp;
        let mut partial = 0;

        // partial page write
        if offset > 0 {
            partial = bpp - offset;
            let head = &buf[..partial.min(buf.len())];
            self.device.write(addr, head)?;
            self.settle();
        }

        // full page writes
        let mut i = partial;
        while i < buf.len() {
            let chunk = &buf[i..(i + bpp).min(buf.len())];
            self.device.write(addr + i, chunk)?;
            self.settle();
            i += bpp;
        }
        Ok(())
    }

    /// Blank the entire device, one physical page at a time
    ///
    /// Fills with [`WIPE_FILL`]; a full-capacity linear write, not
    /// selective.
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn wipe(&mut self) -> Result<()> {
        let bpp = self.geometry.bytes_per_page;
        let blank = vec![WIPE_FILL; bpp];
        log::info!("wiping device: {} pages of {} bytes", self.geometry.pages, bpp);
        for page in 0..self.geometry.pages {
            self.write(page * bpp, &blank)?;
        }
        Ok(())
    }

    fn settle(&self) {
        let cycle = self.geometry.write_cycle();
        if !cycle.is_zero() {
            std::thread::sleep(cycle);
        }
    }
}
