//! 64-byte logical records over the page store
//!
//! Every record in the on-device format is one 64-byte logical page,
//! addressed as `page_index * 64` regardless of the physical page size.
//! This layer adds partial in-place updates (read-modify-write of a full
//! logical page) and AES-protected sub-ranges on top of the raw store.

use crate::common::error::Error;
use crate::common::Result;
use crate::storage::device::MemoryDevice;
use crate::storage::page_store::PageStore;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

/// Logical page size in bytes - the unit of every record
pub const LOGICAL_PAGE_SIZE: usize = 64;

/// AES block size in bytes
const BLOCK_SIZE: usize = 16;

/// A keyed byte range of a record
///
/// `start..end` indexes the *plaintext* being saved (or the on-page byte
/// range being read); `key` protects that range independently of any other
/// segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Encryption key; space-padded or truncated to 16 bytes before use
    pub key: String,
    /// Start of the byte range (inclusive)
    pub start: usize,
    /// End of the byte range (exclusive)
    pub end: usize,
}

impl Segment {
    /// Convenience constructor
    pub fn new<S: Into<String>>(key: S, start: usize, end: usize) -> Self {
        Self {
            key: key.into(),
            start,
            end,
        }
    }
}

/// Normalize a key to the 16 bytes AES-128 requires
///
/// Short keys are space-padded, long keys truncated - the same treatment
/// passwords get before they are stored, so a key types the same both ways.
fn aes_key(key: &str) -> [u8; BLOCK_SIZE] {
    let mut out = [b' '; BLOCK_SIZE];
    let bytes = key.as_bytes();
    let n = bytes.len().min(BLOCK_SIZE);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// ECB-encrypt `data` in 16-byte blocks, zero-padding the final block
fn encrypt_blocks(cipher: &Aes128, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len().next_multiple_of(BLOCK_SIZE));
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block[..chunk.len()].copy_from_slice(chunk);
        let mut block = GenericArray::from(block);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

/// Store of 64-byte logical records
pub struct RecordStore<D: MemoryDevice> {
    pages: PageStore<D>,
}

impl<D: MemoryDevice> RecordStore<D> {
    /// Wrap a page store
    pub fn new(pages: PageStore<D>) -> Self {
        Self { pages }
    }

    /// Access the underlying page store
    pub fn pages(&self) -> &PageStore<D> {
        &self.pages
    }

    /// Mutable access to the underlying page store
    pub fn pages_mut(&mut self) -> &mut PageStore<D> {
        &mut self.pages
    }

    /// Write `data` in plaintext at logical page `page`
    ///
    /// Buffers longer than 64 bytes spill into subsequent logical pages;
    /// single-page semantics are the caller's responsibility.
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn save_plain(&mut self, page: usize, data: &[u8]) -> Result<()> {
        log::debug!("save_plain: page {page}, {} bytes", data.len());
        self.pages.write(page * LOGICAL_PAGE_SIZE, data)
    }

    /// Read the raw 64 bytes of logical page `page`
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn read_raw(&mut self, page: usize) -> Result<Vec<u8>> {
        self.pages.read(page * LOGICAL_PAGE_SIZE, LOGICAL_PAGE_SIZE)
    }

    /// Best-effort text decode of logical page `page`
    ///
    /// Bytes are buffered and re-tried as UTF-8 after each new byte;
    /// whatever never forms a valid sequence by the end of the page is
    /// silently dropped. Returns `None` when nothing decodes.
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn read_text(&mut self, page: usize) -> Result<Option<String>> {
        let raw = self.read_raw(page)?;
        let mut decoded = String::new();
        let mut pending: Vec<u8> = Vec::new();
        for &byte in &raw {
            pending.push(byte);
            if let Ok(text) = std::str::from_utf8(&pending) {
                decoded.push_str(text);
                pending.clear();
            }
        }
        Ok(if decoded.is_empty() {
            None
        } else {
            Some(decoded)
        })
    }

    /// Overwrite bytes `offset..offset + data.len()` of logical page `page`
    ///
    /// The only path that mutates less than a whole page: reads the
    /// current 64 bytes, patches the range, writes the page back. Not
    /// atomic with respect to power loss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] (before any device I/O) when the range
    /// runs past the logical page; propagates device errors.
    pub fn update_partial(&mut self, page: usize, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > LOGICAL_PAGE_SIZE {
            return Err(Error::Range {
                offset,
                len: data.len(),
                page_size: LOGICAL_PAGE_SIZE,
            });
        }
        log::debug!(
            "update_partial: page {page}, offset {offset}, {} bytes",
            data.len()
        );
        let mut current = self.read_raw(page)?;
        current[offset..offset + data.len()].copy_from_slice(data);
        self.save_plain(page, &current)
    }

    /// AES-encrypt keyed segments of `data` and persist into page `page`
    ///
    /// Each segment's plaintext range is ECB-encrypted in 16-byte blocks
    /// (final block zero-padded) and targeted at on-page offset
    /// `start % 64`.
    ///
    /// Compatibility note: only the final segment's ciphertext is written.
    /// The provisioned on-device format was produced by an implementation
    /// that computed every segment but issued a single write after the
    /// loop, so earlier segments are computed and discarded here too. All
    /// call sites in this crate pass exactly one segment; a multi-segment
    /// call is a latent defect and is logged as such.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty segment list; propagates range
    /// and device errors from the underlying partial update.
    pub fn secure_save(&mut self, segments: &[Segment], data: &str, page: usize) -> Result<()> {
        if segments.is_empty() {
            return Err(Error::invalid_input("secure_save requires a segment"));
        }
        if segments.len() > 1 {
            log::warn!(
                "secure_save: {} segments given, only the final one is persisted",
                segments.len()
            );
        }
        let bytes = data.as_bytes();
        let mut ciphertext = Vec::new();
        let mut offset = 0;
        for segment in segments {
            let cipher = Aes128::new(&GenericArray::from(aes_key(&segment.key)));
            let start = segment.start.min(bytes.len());
            let end = segment.end.min(bytes.len());
            ciphertext = encrypt_blocks(&cipher, &bytes[start..end]);
            offset = segment.start % LOGICAL_PAGE_SIZE;
        }
        self.update_partial(page, offset, &ciphertext)
    }

    /// Decrypt keyed segments read directly from page `page`
    ///
    /// For each segment, 16-byte blocks at on-page offsets `start..end`
    /// are decrypted; a block that does not decode as UTF-8 is dropped
    /// (a wrong key turns blocks to garbage, which is an expected
    /// outcome, not an error). The concatenation of surviving bytes is
    /// returned if it decodes as a whole, otherwise `None`.
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn secure_read(&mut self, segments: &[Segment], page: usize) -> Result<Option<String>> {
        let page_address = page * LOGICAL_PAGE_SIZE;
        let mut plaintext: Vec<u8> = Vec::new();

        for segment in segments {
            let cipher = Aes128::new(&GenericArray::from(aes_key(&segment.key)));
            let mut i = segment.start;
            while i < segment.end {
                let raw = self.pages.read(page_address + i, BLOCK_SIZE)?;
                let mut block = GenericArray::clone_from_slice(&raw);
                cipher.decrypt_block(&mut block);
                if std::str::from_utf8(&block).is_ok() {
                    plaintext.extend_from_slice(&block);
                } else {
                    log::debug!("secure_read: dropping undecodable block at offset {i}");
                }
                i += BLOCK_SIZE;
            }
        }

        if plaintext.is_empty() {
            return Ok(None);
        }
        Ok(String::from_utf8(plaintext).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::device::InMemoryDevice;
    use crate::storage::page_store::DeviceGeometry;
    use pretty_assertions::assert_eq;

    fn test_record_store() -> RecordStore<InMemoryDevice> {
        let geometry = DeviceGeometry {
            pages: 32,
            bytes_per_page: 64,
            write_cycle_ms: 0,
        };
        let device = InMemoryDevice::new(geometry.capacity());
        RecordStore::new(PageStore::new(device, geometry))
    }

    #[test]
    fn test_aes_key_padding() {
        assert_eq!(&aes_key("pw"), b"pw              ");
        assert_eq!(&aes_key("0123456789abcdefXX"), b"0123456789abcdef");
    }

    #[test]
    fn test_save_read_raw_round_trip() {
        let mut store = test_record_store();
        let data = crate::common::test_utils::generate_test_data(64);
        store.save_plain(3, &data).unwrap();
        assert_eq!(store.read_raw(3).unwrap(), data);
    }

    #[test]
    fn test_read_text_plain_ascii() {
        let mut store = test_record_store();
        let mut page = vec![b' '; 64];
        page[..5].copy_from_slice(b"hello");
        store.save_plain(0, &page).unwrap();
        let text = store.read_text(0).unwrap().unwrap();
        assert_eq!(text.len(), 64);
        assert!(text.starts_with("hello"));
    }

    #[test]
    fn test_read_text_drops_truncated_sequence() {
        let mut store = test_record_store();
        let mut page = vec![b'a'; 64];
        // 0xC3 opens a two-byte sequence that the page boundary truncates
        page[63] = 0xC3;
        store.save_plain(0, &page).unwrap();
        let text = store.read_text(0).unwrap().unwrap();
        assert_eq!(text, "a".repeat(63));
    }

    #[test]
    fn test_read_text_empty_page_is_none() {
        let mut store = test_record_store();
        let page = vec![0xFFu8; 64];
        store.save_plain(0, &page).unwrap();
        assert_eq!(store.read_text(0).unwrap(), None);
    }

    #[test]
    fn test_update_partial_range_check() {
        let mut store = test_record_store();
        let before = store.read_raw(1).unwrap();
        let err = store.update_partial(1, 60, &[0u8; 10]).unwrap_err();
        assert!(err.is_range());
        // failed update leaves the page untouched
        assert_eq!(store.read_raw(1).unwrap(), before);
    }

    #[test]
    fn test_update_partial_patches_range() {
        let mut store = test_record_store();
        store.save_plain(2, &[b'.'; 64]).unwrap();
        store.update_partial(2, 10, b"patched").unwrap();
        let raw = store.read_raw(2).unwrap();
        assert_eq!(&raw[10..17], b"patched");
        assert_eq!(&raw[..10], b"..........".as_slice());
        assert!(raw[17..].iter().all(|&b| b == b'.'));
    }

    #[test]
    fn test_secure_save_read_round_trip() {
        let mut store = test_record_store();
        let segments = [Segment::new("password1", 0, 32)];
        store
            .secure_save(&segments, "password1       cardAAAA        ", 4)
            .unwrap();
        let text = store.secure_read(&segments, 4).unwrap().unwrap();
        assert_eq!(text, "password1       cardAAAA        ");
    }

    #[test]
    fn test_secure_read_wrong_key_is_none() {
        let mut store = test_record_store();
        let segments = [Segment::new("password1", 0, 32)];
        store
            .secure_save(&segments, "password1       cardAAAA        ", 4)
            .unwrap();
        let wrong = [Segment::new("wrongpw", 0, 32)];
        // garbage blocks are dropped; nothing survives
        assert_eq!(store.secure_read(&wrong, 4).unwrap(), None);
    }

    #[test]
    fn test_secure_save_persists_only_last_segment() {
        let mut store = test_record_store();
        let blank = store.read_raw(5).unwrap();
        let segments = [
            Segment::new("first-key", 0, 16),
            Segment::new("second-key", 32, 48),
        ];
        store
            .secure_save(&segments, &" ".repeat(48), 5)
            .unwrap();
        let raw = store.read_raw(5).unwrap();
        // first segment's target range never written
        assert_eq!(&raw[..16], &blank[..16]);
        // last segment's range was
        assert_ne!(&raw[32..48], &blank[32..48]);
    }

    #[test]
    fn test_secure_save_empty_segments_rejected() {
        let mut store = test_record_store();
        let err = store.secure_save(&[], "data", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
