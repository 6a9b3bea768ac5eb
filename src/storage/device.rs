//! Raw memory device boundary - the byte transport under the page store
//!
//! On hardware this is the I2C serial bus in front of the EEPROM; here the
//! boundary is the [`MemoryDevice`] trait so an in-memory double (with the
//! same timing contract) or a host-side image file can stand in for the
//! real part.

use crate::common::error::Error;
use crate::common::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

/// Random-access byte-addressable non-volatile memory
///
/// Addresses are absolute byte offsets from the start of the part. Reads
/// and writes past `capacity()` are device errors; the transport performs
/// no page splitting or settle-time handling itself - that is the page
/// store's job.
pub trait MemoryDevice {
    /// Total storage capacity in bytes
    fn capacity(&self) -> usize;

    /// Read `len` bytes starting at `addr`
    ///
    /// # Errors
    ///
    /// Returns a device error if the range is out of bounds or the
    /// transport fails.
    fn read(&mut self, addr: usize, len: usize) -> Result<Vec<u8>>;

    /// Write `buf` starting at `addr`
    ///
    /// # Errors
    ///
    /// Returns a device error if the range is out of bounds or the
    /// transport fails.
    fn write(&mut self, addr: usize, buf: &[u8]) -> Result<()>;
}

/// In-memory device double
///
/// Backs the full address space with a `Vec<u8>` and models the parts of
/// the hardware contract tests care about: optional per-operation latency
/// (standing in for bus time), a journal of raw writes (to observe page
/// splitting), and one-shot write fault injection.
pub struct InMemoryDevice {
    buffer: Vec<u8>,
    latency: Duration,
    journal: Vec<(usize, usize)>,
    fail_next_write: bool,
}

impl InMemoryDevice {
    /// Create a device of `capacity` bytes, zero-initialized, no latency
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            latency: Duration::ZERO,
            journal: Vec::new(),
            fail_next_write: false,
        }
    }

    /// Create a device that sleeps `latency` on every read and write
    pub fn with_latency(capacity: usize, latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new(capacity)
        }
    }

    /// Journal of `(addr, len)` pairs, one per raw write issued
    pub fn write_journal(&self) -> &[(usize, usize)] {
        &self.journal
    }

    /// Clear the write journal
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Make the next write fail with a device error
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Direct view of the backing buffer (test inspection)
    pub fn raw(&self) -> &[u8] {
        &self.buffer
    }

    fn check_range(&self, addr: usize, len: usize) -> Result<()> {
        if addr.checked_add(len).map_or(true, |end| end > self.buffer.len()) {
            return Err(Error::device(format!(
                "access out of bounds: addr {addr} len {len} capacity {}",
                self.buffer.len()
            )));
        }
        Ok(())
    }
}

impl MemoryDevice for InMemoryDevice {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn read(&mut self, addr: usize, len: usize) -> Result<Vec<u8>> {
        self.check_range(addr, len)?;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        Ok(self.buffer[addr..addr + len].to_vec())
    }

    fn write(&mut self, addr: usize, buf: &[u8]) -> Result<()> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(Error::device("injected write fault"));
        }
        self.check_range(addr, buf.len())?;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.buffer[addr..addr + buf.len()].copy_from_slice(buf);
        self.journal.push((addr, buf.len()));
        Ok(())
    }
}

/// File-backed device image
///
/// A byte-for-byte image of the EEPROM in a regular file, for host-side
/// provisioning and inspection tooling. Created at full capacity up front
/// so addresses map 1:1 to file offsets.
pub struct EepromImage {
    file: File,
    capacity: usize,
}

impl EepromImage {
    /// Open (or create) an image file of exactly `capacity` bytes
    ///
    /// # Errors
    ///
    /// Returns a device error if the file cannot be opened or sized.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < capacity as u64 {
            file.set_len(capacity as u64)?;
        }
        Ok(Self { file, capacity })
    }

    fn check_range(&self, addr: usize, len: usize) -> Result<()> {
        if addr.checked_add(len).map_or(true, |end| end > self.capacity) {
            return Err(Error::device(format!(
                "access out of bounds: addr {addr} len {len} capacity {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

impl MemoryDevice for EepromImage {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&mut self, addr: usize, len: usize) -> Result<Vec<u8>> {
        self.check_range(addr, len)?;
        self.file.seek(SeekFrom::Start(addr as u64))?;
        let mut buf = vec![0; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, addr: usize, buf: &[u8]) -> Result<()> {
        self.check_range(addr, buf.len())?;
        self.file.seek(SeekFrom::Start(addr as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}
