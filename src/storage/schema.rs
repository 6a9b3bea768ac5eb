//! Region map and domain operations - the "database" of the appliance
//!
//! A [`SchemaManager`] owns the fixed byte-offset schema that partitions
//! the EEPROM's logical pages:
//!
//! | Region       | Pages        | Contents                                  |
//! |--------------|--------------|-------------------------------------------|
//! | General info | 0            | site label, counters, flags, master key   |
//! | Admin        | 1            | AES-encrypted admin password slots        |
//! | Users        | 2..=6        | per-user AES password+card, card key, API |
//! | Phones       | 7..=9        | packed 20-byte obfuscated phone entries   |
//! | API keys     | 10           | obfuscated 16-byte admin API tokens       |
//! | Logs         | 11..max_page | ring buffer of AES-encrypted audit entries|
//!
//! The running counters live in this struct and are reloaded from page 0
//! by [`SchemaManager::read_general_info`], the only (re)initialization
//! path. One instance, one logical writer: none of these operations are
//! safe to interleave from multiple tasks (every partial update is a
//! read-modify-write against the same device).

use crate::common::error::Error;
use crate::common::Result;
use crate::storage::codec;
use crate::storage::device::MemoryDevice;
use crate::storage::page_store::WIPE_FILL;
use crate::storage::record::{RecordStore, Segment, LOGICAL_PAGE_SIZE};

/// Logical page of the general-info record
pub const GENERAL_PAGE: usize = 0;
/// Logical page of the admin password slots
pub const ADMIN_PAGE: usize = 1;
/// First logical page of the user region
pub const USER_BASE_PAGE: usize = 2;
/// Number of user slots (one page each)
pub const MAX_USERS: usize = 5;
/// First logical page of the phone directory
pub const PHONE_BASE_PAGE: usize = 7;
/// Number of phone-directory pages
pub const PHONE_PAGES: usize = 3;
/// Logical page of the shared admin API-token slots
pub const API_KEY_PAGE: usize = 10;
/// First logical page of the log ring
pub const LOG_BASE_PAGE: usize = 11;

/// Admin password slot width in bytes
const ADMIN_SLOT: usize = 16;
/// Number of admin slots (3 x 16 bytes; the rest of the page is reserved)
pub const MAX_ADMINS: usize = 3;
/// Phone-directory slot width in bytes
const PHONE_SLOT: usize = 20;
/// API-token slot width in bytes
const API_SLOT: usize = 16;
/// Scrambled payload width of an 8-character secret
const SCRAMBLED_LEN: usize = 16;
/// Highest value the 3-digit ASCII log counter field can hold
const MAX_LOG_COUNT: usize = 999;

/// Severity of an audit-log entry; persists as its ASCII digit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Routine event
    Info = 1,
    /// Something worth attention
    Warning = 2,
    /// A failure
    Error = 3,
}

impl LogKind {
    /// The ASCII digit this kind persists as
    pub fn digit(self) -> char {
        match self {
            LogKind::Info => '1',
            LogKind::Warning => '2',
            LogKind::Error => '3',
        }
    }
}

/// A user's stored credentials, decrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Space-padded password (16 bytes)
    pub password: String,
    /// Space-padded card identifier (16 bytes)
    pub card_id: String,
    /// Raw card session key, stored verbatim from the RFID exchange
    pub card_key: [u8; 16],
}

/// Space-pad `text` out to `len` bytes (no-op when already long enough)
fn pad_text(text: &str, len: usize) -> String {
    let mut out = text.to_string();
    while out.len() < len {
        out.push(' ');
    }
    out
}

/// True when a slot still holds the wipe fill pattern
fn is_blank_slot(slot: &[u8]) -> bool {
    slot.iter().all(|&b| b == WIPE_FILL)
}

/// Secrets fed to the obfuscation codec must be printable ASCII, or the
/// scramble re-roll can never land on a distinct printable value
fn check_printable(value: &str, what: &str) -> Result<()> {
    if value.bytes().all(|b| (32..=126).contains(&b)) {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "{what} must be printable ASCII"
        )))
    }
}

/// The appliance database: region map, counters, and every domain operation
pub struct SchemaManager<D: MemoryDevice> {
    store: RecordStore<D>,
    max_pages: usize,
    site_label: String,
    user_count: usize,
    admin_count: usize,
    log_count: usize,
    flags: u8,
    /// Master key in its obfuscated (scrambled) form, 32 bytes; never held
    /// or persisted in plaintext
    master_key: Vec<u8>,
    /// Card session key captured out-of-band, consumed by the next
    /// enrollment
    card_key: Option<[u8; 16]>,
}

impl<D: MemoryDevice> SchemaManager<D> {
    /// Create a manager over `store`, using every logical page the device
    /// has
    ///
    /// Counters start empty; call [`read_general_info`](Self::read_general_info)
    /// to load them from a provisioned device, or
    /// [`initialize`](Self::initialize) to provision from scratch.
    pub fn new(store: RecordStore<D>) -> Self {
        let max_pages = store.pages().capacity() / LOGICAL_PAGE_SIZE;
        Self::with_max_pages(store, max_pages)
    }

    /// Create a manager that confines the schema (and the log ring) to the
    /// first `max_pages` logical pages
    ///
    /// The log counter persists as three ASCII digits, so the ring is
    /// capped at [`MAX_LOG_COUNT`] slots however large the device is.
    pub fn with_max_pages(store: RecordStore<D>, max_pages: usize) -> Self {
        Self {
            store,
            max_pages: max_pages.min(LOG_BASE_PAGE + MAX_LOG_COUNT),
            site_label: String::new(),
            user_count: 0,
            admin_count: 0,
            log_count: 0,
            flags: 0,
            master_key: Vec::new(),
            card_key: None,
        }
    }

    /// Number of enrolled users
    pub fn user_count(&self) -> usize {
        self.user_count
    }

    /// Number of enrolled admins
    pub fn admin_count(&self) -> usize {
        self.admin_count
    }

    /// Monotonic log counter (wraps with the ring)
    pub fn log_count(&self) -> usize {
        self.log_count
    }

    /// Number of logical pages the schema spans; the log ring ends here
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Site label from the general-info record
    pub fn site_label(&self) -> &str {
        &self.site_label
    }

    /// Whether first-time setup has completed (general-info flag byte)
    pub fn is_initialized(&self) -> bool {
        self.flags == b'1'
    }

    /// Access the underlying record store (test inspection)
    pub fn store_mut(&mut self) -> &mut RecordStore<D> {
        &mut self.store
    }

    // ---- general info -------------------------------------------------

    /// Reload every counter from the general-info record
    ///
    /// The only path that (re)initializes in-memory state from storage.
    ///
    /// # Errors
    ///
    /// `Corruption` when the stored counters fail to parse; device errors
    /// propagate.
    pub fn read_general_info(&mut self) -> Result<()> {
        let raw = self.store.read_raw(GENERAL_PAGE)?;
        self.site_label = String::from_utf8(raw[0..10].to_vec())
            .map_err(|_| Error::corruption("site label is not valid text"))?;
        self.user_count = parse_counter(&raw[10..11], "user count")?;
        self.log_count = parse_counter(&raw[11..14], "log count")?;
        // The flag byte is only ever an ASCII digit; anything else would
        // reserialize wider than one byte and push the record past 64.
        if !raw[14].is_ascii_digit() {
            return Err(Error::corruption("status flag is not an ASCII digit"));
        }
        self.flags = raw[14];
        self.admin_count = parse_counter(&raw[15..16], "admin count")?;
        self.master_key = raw[32..64].to_vec();
        log::debug!(
            "general info: label={:?} users={} admins={} logs={}",
            self.site_label,
            self.user_count,
            self.admin_count,
            self.log_count
        );
        Ok(())
    }

    /// Serialize the in-memory counters back to page 0 and re-read them
    ///
    /// Re-reading after the write keeps the in-memory view consistent with
    /// what actually landed on the device.
    ///
    /// # Errors
    ///
    /// Device errors propagate; `Corruption` if the re-read fails to parse.
    pub fn update_general_info(&mut self) -> Result<()> {
        let mut record = Vec::with_capacity(LOGICAL_PAGE_SIZE);
        record.extend_from_slice(self.site_label.as_bytes());
        record.extend_from_slice(format!("{}{:03}", self.user_count, self.log_count).as_bytes());
        record.push(self.flags);
        record.extend_from_slice(self.admin_count.to_string().as_bytes());
        record.extend_from_slice(&[b'0'; 16]);
        record.extend_from_slice(&self.master_key);
        // A record that is not exactly one page would spill into the admin
        // region; refuse to write it.
        if record.len() != LOGICAL_PAGE_SIZE {
            return Err(Error::corruption(format!(
                "general-info record serialized to {} bytes, expected {LOGICAL_PAGE_SIZE}",
                record.len()
            )));
        }
        self.store.save_plain(GENERAL_PAGE, &record)?;
        self.read_general_info()
    }

    /// Write a fresh general-info record: new label, new master key, all
    /// counters zeroed, setup flag set
    ///
    /// `master_key` is the plaintext 16-byte key; it is scrambled through
    /// the obfuscation codec before it ever reaches the device and is not
    /// retained in plaintext.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a label over 10 bytes or a key that is not 16
    /// printable-ASCII bytes; device errors propagate.
    pub fn save_general_info(&mut self, label: &str, master_key: &str) -> Result<()> {
        if label.len() > 10 {
            return Err(Error::invalid_input("site label exceeds 10 bytes"));
        }
        if master_key.len() != 16 {
            return Err(Error::invalid_input("master key must be 16 bytes"));
        }
        check_printable(master_key, "master key")?;
        self.site_label = pad_text(label, 10);
        self.user_count = 0;
        self.admin_count = 0;
        self.log_count = 0;
        self.flags = b'1';
        self.master_key = codec::scramble(master_key.as_bytes());
        self.update_general_info()
    }

    /// First-time provisioning: wipe the device, write general info, and
    /// enroll the first admin
    ///
    /// # Errors
    ///
    /// Propagates validation and device errors from the steps involved.
    pub fn initialize(&mut self, label: &str, master_key: &str, admin_password: &str) -> Result<()> {
        log::info!("initializing device for site {label:?}");
        self.wipe_all()?;
        self.save_general_info(label, master_key)?;
        self.enroll_admin(admin_password)
    }

    /// Blank the entire device
    ///
    /// # Errors
    ///
    /// Propagates device errors.
    pub fn wipe_all(&mut self) -> Result<()> {
        self.store.pages_mut().wipe()
    }

    // ---- users --------------------------------------------------------

    /// Stage the raw 16-byte card session key produced by the RFID
    /// exchange; consumed by the next [`enroll_user`](Self::enroll_user)
    pub fn set_card_key(&mut self, key: [u8; 16]) {
        self.card_key = Some(key);
    }

    /// Enroll a user: AES-protected password+card, raw card key, and
    /// obfuscated API token, in the next free user slot
    ///
    /// The password doubles as the AES key (see
    /// [`authenticate_user`](Self::authenticate_user)).
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the user region is full, no card key is staged,
    /// or the API token is invalid; device errors propagate.
    pub fn enroll_user(&mut self, password: &str, card_id: &str, api_token: &str) -> Result<()> {
        if self.user_count >= MAX_USERS {
            return Err(Error::invalid_input("user region is full"));
        }
        let card_key = self
            .card_key
            .take()
            .ok_or_else(|| Error::invalid_input("no card key staged for enrollment"))?;

        let page = USER_BASE_PAGE + self.user_count;
        let data = format!("{}{}", pad_text(password, 16), pad_text(card_id, 16));
        let guard = [Segment::new(password, 0, 32)];
        self.store.secure_save(&guard, &data, page)?;
        self.store.update_partial(page, 32, &card_key)?;
        self.store_api_at(api_token, page)?;
        self.user_count += 1;
        log::info!("enrolled user in slot {}", self.user_count - 1);
        self.update_general_info()
    }

    /// Find the user slot that `candidate` unlocks
    ///
    /// Authentication here is "decrypt and check for plausible text":
    /// there is no stored hash and no comparison - the AES key itself is
    /// the access gate, and a wrong password simply fails to decrypt to
    /// valid UTF-8. Non-standard, kept for compatibility with provisioned
    /// devices.
    ///
    /// # Errors
    ///
    /// Device errors propagate; a wrong password is `Ok(None)`.
    pub fn authenticate_user(&mut self, candidate: &str) -> Result<Option<usize>> {
        for slot in 0..MAX_USERS {
            let guard = [Segment::new(candidate, 0, 32)];
            if let Some(text) = self.store.secure_read(&guard, USER_BASE_PAGE + slot)? {
                if !text.is_empty() {
                    log::debug!("user credential matched slot {slot}");
                    return Ok(Some(slot));
                }
            }
        }
        Ok(None)
    }

    /// Decrypt a user slot with the user's own password
    ///
    /// # Errors
    ///
    /// `NotFound` for an out-of-range slot; device errors propagate. A
    /// wrong key yields `Ok(None)`.
    pub fn read_user(&mut self, key: &str, slot: usize) -> Result<Option<UserRecord>> {
        if slot >= MAX_USERS {
            return Err(Error::not_found(format!("user slot {slot}")));
        }
        let page = USER_BASE_PAGE + slot;
        let guard = [Segment::new(key, 0, 32)];
        let Some(text) = self.store.secure_read(&guard, page)? else {
            return Ok(None);
        };
        if text.len() < 32 {
            return Ok(None);
        }
        let raw = self.store.read_raw(page)?;
        let mut card_key = [0u8; 16];
        card_key.copy_from_slice(&raw[32..48]);
        Ok(Some(UserRecord {
            password: text[0..16].to_string(),
            card_id: text[16..32].to_string(),
            card_key,
        }))
    }

    /// Delete a user slot and compact the ones after it
    ///
    /// Every subsequent user's full page shifts down one slot; the vacated
    /// last slot is blanked. Not a tombstone.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when only one user remains, `NotFound` for a bad
    /// index; device errors propagate.
    pub fn delete_user(&mut self, index: usize) -> Result<()> {
        if self.user_count <= 1 {
            return Err(Error::invalid_input(
                "at least one user must remain registered",
            ));
        }
        if index >= self.user_count {
            return Err(Error::not_found(format!("user slot {index}")));
        }

        for i in index..self.user_count - 1 {
            let data = self.store.read_raw(USER_BASE_PAGE + i + 1)?;
            self.store.save_plain(USER_BASE_PAGE + i, &data)?;
        }
        let vacated = USER_BASE_PAGE + self.user_count - 1;
        self.store
            .save_plain(vacated, &[WIPE_FILL; LOGICAL_PAGE_SIZE])?;
        self.user_count -= 1;
        log::info!("deleted user slot {index}, {} remain", self.user_count);
        self.update_general_info()
    }

    // ---- admins -------------------------------------------------------

    /// Enroll an admin password in the next free 16-byte slot
    ///
    /// # Errors
    ///
    /// `InvalidInput` when all admin slots are taken; device errors
    /// propagate.
    pub fn enroll_admin(&mut self, password: &str) -> Result<()> {
        if self.admin_count >= MAX_ADMINS {
            return Err(Error::invalid_input("admin region is full"));
        }
        let space = self.admin_count * ADMIN_SLOT;
        // Place the password bytes at the slot's own range so the segment
        // offset (start % 64) lands the ciphertext in the right slot.
        let data = format!("{}{}", " ".repeat(space), pad_text(password, 16));
        let guard = [Segment::new(password, space, space + ADMIN_SLOT)];
        self.store.secure_save(&guard, &data, ADMIN_PAGE)?;
        self.admin_count += 1;
        log::info!("enrolled admin in slot {}", self.admin_count - 1);
        self.update_general_info()
    }

    /// Check `candidate` against every admin slot
    ///
    /// Reads the whole 48-byte slot span under the candidate key; slots
    /// the key does not open decrypt to garbage and are dropped, so any
    /// surviving text means the candidate is a valid admin key.
    ///
    /// # Errors
    ///
    /// Device errors propagate; a wrong password is `Ok(None)`.
    pub fn authenticate_admin(&mut self, candidate: &str) -> Result<Option<String>> {
        let guard = [Segment::new(candidate, 0, MAX_ADMINS * ADMIN_SLOT)];
        self.store.secure_read(&guard, ADMIN_PAGE)
    }

    /// Convenience wrapper: is `candidate` a valid admin password?
    ///
    /// # Errors
    ///
    /// Device errors propagate.
    pub fn is_admin(&mut self, candidate: &str) -> Result<bool> {
        Ok(self
            .authenticate_admin(candidate)?
            .is_some_and(|text| !text.is_empty()))
    }

    // ---- logs ---------------------------------------------------------

    /// Append an audit entry to the log ring
    ///
    /// The entry persists as `"{kind}-{timestamp}-{message}"`, AES-encrypted
    /// as a whole page under the key recovered by unscrambling the stored
    /// master key. `timestamp` is caller-supplied `DD-MM-YYYY HH:MM:SS`
    /// text; the time source lives outside this layer. When the next
    /// target page would fall past the last page, the counter wraps and
    /// the entry overwrites the ring's first page.
    ///
    /// # Errors
    ///
    /// `Corruption` when the stored master key does not unscramble to
    /// text; device errors propagate.
    pub fn append_log(&mut self, message: &str, kind: LogKind, timestamp: &str) -> Result<()> {
        let entry = format!("{}-{}-{}", kind.digit(), timestamp, message);
        let key = self.log_key()?;

        let mut page = LOG_BASE_PAGE + self.log_count;
        if page >= self.max_pages {
            self.log_count = 0;
            page = LOG_BASE_PAGE;
        } else {
            self.log_count += 1;
        }
        log::debug!("appending log to page {page} (count now {})", self.log_count);

        let guard = [Segment::new(key, 0, LOGICAL_PAGE_SIZE)];
        self.store.secure_save(&guard, &entry, page)?;
        self.update_general_info()
    }

    /// Decrypt a single log page
    ///
    /// # Errors
    ///
    /// `Corruption` when the stored master key does not unscramble to
    /// text; device errors propagate. An empty or unreadable page is
    /// `Ok(None)`.
    pub fn read_log(&mut self, page: usize) -> Result<Option<String>> {
        let key = self.log_key()?;
        let guard = [Segment::new(key, 0, LOGICAL_PAGE_SIZE)];
        self.store.secure_read(&guard, page)
    }

    /// Collect up to `limit` log entries, most recent first
    ///
    /// Walks backward from the latest entry and stops at the region edge,
    /// at the first structurally empty page, or once `limit` entries have
    /// been collected. With `kind` set, only matching entries are kept -
    /// and only those count toward `limit` - but the empty-page stop
    /// applies regardless of the filter.
    ///
    /// # Errors
    ///
    /// Same as [`read_log`](Self::read_log).
    pub fn list_logs(&mut self, limit: usize, kind: Option<LogKind>) -> Result<Vec<String>> {
        let mut logs = Vec::new();
        let mut i = 0;
        while logs.len() < limit {
            let Some(page) = (LOG_BASE_PAGE + self.log_count).checked_sub(1 + i) else {
                break;
            };
            if page < LOG_BASE_PAGE || page >= self.max_pages {
                break;
            }
            let Some(entry) = self.read_log(page)? else {
                break;
            };
            match kind {
                Some(k) if !entry.starts_with(k.digit()) => {}
                _ => logs.push(entry),
            }
            i += 1;
        }
        Ok(logs)
    }

    /// Recover the AES log key from the stored (obfuscated) master key
    fn log_key(&self) -> Result<String> {
        let key = codec::unscramble(&self.master_key);
        String::from_utf8(key)
            .map_err(|_| Error::corruption("master key does not unscramble to text"))
    }

    // ---- phones and API tokens ----------------------------------------

    /// Store an obfuscated phone number in the directory
    ///
    /// Numbers are space-padded to 8 characters, scrambled to 16 bytes,
    /// and placed in 20-byte slots: admin entries fill the first phone
    /// page by admin index, user entries fill the following pages three
    /// slots per page by user index.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for numbers over 8 bytes or non-printable input;
    /// range and device errors propagate.
    pub fn store_phone(&mut self, number: &str, is_admin: bool) -> Result<()> {
        if number.len() > 8 {
            return Err(Error::invalid_input("phone number exceeds 8 bytes"));
        }
        check_printable(number, "phone number")?;
        let padded = pad_text(number, 8);
        let scrambled = codec::scramble(padded.as_bytes());

        let (page, offset) = if is_admin {
            let mut page = PHONE_BASE_PAGE;
            let mut offset = self.admin_count * PHONE_SLOT;
            // slot 3 would straddle the page edge; roll to the next page
            if offset >= 60 {
                offset = 0;
                page += 1;
            }
            (page, offset)
        } else {
            // Three 20-byte slots per page; the trailing 4 bytes of each
            // page stay blank.
            let page = PHONE_BASE_PAGE + 1 + self.user_count / 3;
            let offset = (self.user_count % 3) * PHONE_SLOT;
            (page, offset)
        };
        log::debug!("storing phone entry at page {page} offset {offset}");
        self.store.update_partial(page, offset, &scrambled)
    }

    /// Collect every populated phone entry, unscrambled
    ///
    /// # Errors
    ///
    /// Device errors propagate; slots that fail to decode are dropped.
    pub fn list_phones(&mut self) -> Result<Vec<String>> {
        let mut phones = Vec::new();
        for page in PHONE_BASE_PAGE..PHONE_BASE_PAGE + PHONE_PAGES {
            let raw = self.store.read_raw(page)?;
            // last 4 bytes of each page are never part of a slot
            for slot in raw[..60].chunks(PHONE_SLOT) {
                if is_blank_slot(slot) {
                    continue;
                }
                let number = codec::unscramble(&slot[..SCRAMBLED_LEN]);
                if let Ok(text) = String::from_utf8(number) {
                    phones.push(text.trim_end().to_string());
                }
            }
        }
        Ok(phones)
    }

    /// Store an obfuscated API token for the next admin slot
    ///
    /// # Errors
    ///
    /// `InvalidInput` for tokens over 8 bytes or non-printable input;
    /// device errors propagate.
    pub fn store_admin_api_token(&mut self, token: &str) -> Result<()> {
        self.store_api_at(token, API_KEY_PAGE)
    }

    /// Obfuscate `token` and write it to its slot on `page`
    ///
    /// On the shared API-key page the slot is picked by admin index; on a
    /// user page the token always lands at byte 48.
    fn store_api_at(&mut self, token: &str, page: usize) -> Result<()> {
        if token.len() > 8 {
            return Err(Error::invalid_input("API token exceeds 8 bytes"));
        }
        check_printable(token, "API token")?;
        let scrambled = codec::scramble(pad_text(token, 8).as_bytes());
        let offset = if page == API_KEY_PAGE {
            API_SLOT * self.admin_count
        } else {
            48
        };
        log::debug!("storing API token at page {page} offset {offset}");
        self.store.update_partial(page, offset, &scrambled)
    }

    /// Collect API tokens, unscrambled
    ///
    /// With `admin` set, the shared admin slots come first, truncated to
    /// their 7 meaningful characters; user tokens follow either way, with
    /// trailing padding trimmed.
    ///
    /// # Errors
    ///
    /// Device errors propagate; slots that fail to decode are dropped.
    pub fn get_api_tokens(&mut self, admin: bool) -> Result<Vec<String>> {
        let mut tokens = Vec::new();

        if admin {
            let raw = self.store.read_raw(API_KEY_PAGE)?;
            for slot in raw.chunks(API_SLOT) {
                if is_blank_slot(slot) {
                    continue;
                }
                let token = codec::unscramble(slot);
                if let Ok(text) = String::from_utf8(token) {
                    tokens.push(text.chars().take(7).collect());
                }
            }
        }

        for page in USER_BASE_PAGE..USER_BASE_PAGE + MAX_USERS {
            let raw = self.store.read_raw(page)?;
            let slot = &raw[48..64];
            if is_blank_slot(slot) {
                continue;
            }
            let token = codec::unscramble(slot);
            if let Ok(text) = String::from_utf8(token) {
                tokens.push(text.trim_end().to_string());
            }
        }

        Ok(tokens)
    }
}

/// Parse an ASCII-decimal counter field from the general-info record
fn parse_counter(raw: &[u8], what: &str) -> Result<usize> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::corruption(format!("{what} field is not a decimal number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::device::InMemoryDevice;
    use crate::storage::page_store::{DeviceGeometry, PageStore};
    use pretty_assertions::assert_eq;

    const TS: &str = "01-02-2026 10:20:30";

    fn test_manager_with_pages(pages: usize) -> SchemaManager<InMemoryDevice> {
        let geometry = DeviceGeometry {
            pages,
            bytes_per_page: 64,
            write_cycle_ms: 0,
        };
        let device = InMemoryDevice::new(geometry.capacity());
        let store = RecordStore::new(PageStore::new(device, geometry));
        let mut manager = SchemaManager::new(store);
        manager
            .initialize("TOWER-A 1", "0123456789abcdef", "123456")
            .unwrap();
        manager
    }

    fn test_manager() -> SchemaManager<InMemoryDevice> {
        test_manager_with_pages(32)
    }

    #[test]
    fn test_initialize_round_trips_general_info() {
        let mut manager = test_manager();
        assert!(manager.is_initialized());
        assert_eq!(manager.site_label(), "TOWER-A 1 ");
        assert_eq!(manager.user_count(), 0);
        assert_eq!(manager.admin_count(), 1);
        assert_eq!(manager.log_count(), 0);

        // a fresh read from storage agrees
        manager.read_general_info().unwrap();
        assert_eq!(manager.admin_count(), 1);
    }

    #[test]
    fn test_master_key_never_plaintext_on_device() {
        let mut manager = test_manager();
        let raw = manager.store_mut().read_raw(GENERAL_PAGE).unwrap();
        let stored = &raw[32..64];
        assert!(!stored.windows(16).any(|w| w == b"0123456789abcdef"));
        assert_eq!(codec::unscramble(stored), b"0123456789abcdef");
    }

    #[test]
    fn test_save_general_info_validation() {
        let mut manager = test_manager();
        assert!(manager
            .save_general_info("label too long!", "0123456789abcdef")
            .is_err());
        assert!(manager.save_general_info("ok", "short").is_err());
        assert!(manager
            .save_general_info("ok", "\u{1}123456789abcdef")
            .is_err());
    }

    #[test]
    fn test_read_general_info_rejects_bad_counter() {
        let mut manager = test_manager();
        manager
            .store_mut()
            .update_partial(GENERAL_PAGE, 10, b"X")
            .unwrap();
        let err = manager.read_general_info().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_corrupt_flag_byte_is_rejected_and_contained() {
        let mut manager = test_manager();
        let admin_before = manager.store_mut().read_raw(ADMIN_PAGE).unwrap();

        // a damaged image with a non-ASCII flag byte must not be accepted
        manager
            .store_mut()
            .update_partial(GENERAL_PAGE, 14, &[0xB5])
            .unwrap();
        let err = manager.read_general_info().unwrap_err();
        assert!(err.is_corruption());

        // the last good in-memory view can still be written back, and the
        // record stays inside page 0
        manager.update_general_info().unwrap();
        assert!(manager.is_initialized());
        assert_eq!(
            manager.store_mut().read_raw(ADMIN_PAGE).unwrap(),
            admin_before
        );
        // the rewritten master key still recovers the log key
        let raw = manager.store_mut().read_raw(GENERAL_PAGE).unwrap();
        assert_eq!(codec::unscramble(&raw[32..64]), b"0123456789abcdef");
    }

    #[test]
    fn test_log_ring_capped_at_counter_width() {
        // a device big enough that an unclamped ring would need a four
        // digit counter
        let geometry = DeviceGeometry {
            pages: 2048,
            bytes_per_page: 64,
            write_cycle_ms: 0,
        };
        let device = InMemoryDevice::new(geometry.capacity());
        let store = RecordStore::new(PageStore::new(device, geometry));
        let manager = SchemaManager::new(store);
        assert_eq!(manager.max_pages(), LOG_BASE_PAGE + 999);
    }

    #[test]
    fn test_enroll_and_authenticate_user() {
        let mut manager = test_manager();
        manager.set_card_key(*b"RFIDSESSIONKEY00");
        manager
            .enroll_user("password1", "cardAAAA", "api1234")
            .unwrap();
        assert_eq!(manager.user_count(), 1);

        assert_eq!(manager.authenticate_user("password1").unwrap(), Some(0));
        assert_eq!(manager.authenticate_user("wrongpw").unwrap(), None);
    }

    #[test]
    fn test_enroll_user_requires_card_key() {
        let mut manager = test_manager();
        let err = manager.enroll_user("pw", "card", "api").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_enroll_user_region_full() {
        let mut manager = test_manager();
        for i in 0..MAX_USERS {
            manager.set_card_key([i as u8; 16]);
            manager
                .enroll_user(&format!("pw{i}"), &format!("card{i}"), &format!("api{i}"))
                .unwrap();
        }
        manager.set_card_key([9u8; 16]);
        assert!(manager.enroll_user("pw9", "card9", "api9").is_err());
    }

    #[test]
    fn test_read_user_returns_stored_fields() {
        let mut manager = test_manager();
        manager.set_card_key(*b"RFIDSESSIONKEY00");
        manager
            .enroll_user("password1", "cardAAAA", "api1234")
            .unwrap();

        let record = manager.read_user("password1", 0).unwrap().unwrap();
        assert_eq!(record.password, "password1       ");
        assert_eq!(record.card_id, "cardAAAA        ");
        assert_eq!(&record.card_key, b"RFIDSESSIONKEY00");

        assert_eq!(manager.read_user("wrongpw", 0).unwrap(), None);
        assert!(manager.read_user("password1", MAX_USERS).is_err());
    }

    #[test]
    fn test_admin_authentication() {
        let mut manager = test_manager();
        assert!(manager.is_admin("123456").unwrap());
        assert!(!manager.is_admin("000000").unwrap());

        manager.enroll_admin("secondpw").unwrap();
        assert_eq!(manager.admin_count(), 2);
        assert!(manager.is_admin("secondpw").unwrap());
        assert!(manager.is_admin("123456").unwrap());
    }

    #[test]
    fn test_admin_region_full() {
        let mut manager = test_manager();
        manager.enroll_admin("admin2").unwrap();
        manager.enroll_admin("admin3").unwrap();
        assert!(manager.enroll_admin("admin4").is_err());
    }

    #[test]
    fn test_append_and_list_logs() {
        let mut manager = test_manager();
        manager.append_log("door opened", LogKind::Info, TS).unwrap();
        manager.append_log("door opened", LogKind::Info, TS).unwrap();
        manager.append_log("door opened", LogKind::Info, TS).unwrap();
        assert_eq!(manager.log_count(), 3);

        let logs = manager.list_logs(10, None).unwrap();
        assert_eq!(logs.len(), 3);
        for entry in &logs {
            assert!(entry.starts_with('1'));
            assert!(entry.contains("door opened"));
        }
    }

    #[test]
    fn test_list_logs_most_recent_first() {
        let mut manager = test_manager();
        manager.append_log("first", LogKind::Info, TS).unwrap();
        manager.append_log("second", LogKind::Warning, TS).unwrap();
        manager.append_log("third", LogKind::Error, TS).unwrap();

        let logs = manager.list_logs(10, None).unwrap();
        assert!(logs[0].contains("third"));
        assert!(logs[1].contains("second"));
        assert!(logs[2].contains("first"));
    }

    #[test]
    fn test_list_logs_limit_and_filter() {
        let mut manager = test_manager();
        manager.append_log("a", LogKind::Info, TS).unwrap();
        manager.append_log("b", LogKind::Error, TS).unwrap();
        manager.append_log("c", LogKind::Info, TS).unwrap();
        manager.append_log("d", LogKind::Info, TS).unwrap();

        assert_eq!(manager.list_logs(2, None).unwrap().len(), 2);

        let errors = manager.list_logs(10, Some(LogKind::Error)).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with('3'));
    }

    #[test]
    fn test_log_ring_wraparound() {
        // 16 logical pages -> log region is pages 11..16, five slots
        let mut manager = test_manager_with_pages(16);
        for _ in 0..5 {
            manager.append_log("fill", LogKind::Info, TS).unwrap();
        }
        assert_eq!(manager.log_count(), 5);

        // next target would be page 16, past the last page: wrap
        manager.append_log("wrapped", LogKind::Info, TS).unwrap();
        assert_eq!(manager.log_count(), 0);
        let first = manager.read_log(LOG_BASE_PAGE).unwrap().unwrap();
        assert!(first.contains("wrapped"));
    }

    #[test]
    fn test_delete_user_compacts_slots() {
        let mut manager = test_manager();
        for i in 0..3 {
            manager.set_card_key([i as u8; 16]);
            manager
                .enroll_user(&format!("pw{i}"), &format!("card{i}"), &format!("api{i}"))
                .unwrap();
        }

        manager.delete_user(0).unwrap();
        assert_eq!(manager.user_count(), 2);

        // pw1 moved into slot 0, pw2 into slot 1, pw0 is gone
        assert_eq!(manager.authenticate_user("pw1").unwrap(), Some(0));
        assert_eq!(manager.authenticate_user("pw2").unwrap(), Some(1));
        assert_eq!(manager.authenticate_user("pw0").unwrap(), None);

        // vacated slot is blanked
        let raw = manager.store_mut().read_raw(USER_BASE_PAGE + 2).unwrap();
        assert!(raw.iter().all(|&b| b == WIPE_FILL));
    }

    #[test]
    fn test_delete_user_guards() {
        let mut manager = test_manager();
        manager.set_card_key([1u8; 16]);
        manager.enroll_user("pw0", "card0", "api0").unwrap();
        // only one user: refuse
        assert!(manager.delete_user(0).is_err());

        manager.set_card_key([2u8; 16]);
        manager.enroll_user("pw1", "card1", "api1").unwrap();
        assert!(manager.delete_user(5).is_err());
    }

    #[test]
    fn test_store_and_list_phones() {
        let mut manager = test_manager();
        manager.store_phone("5551234", true).unwrap();

        manager.set_card_key([1u8; 16]);
        manager.enroll_user("pw0", "card0", "api0").unwrap();
        manager.store_phone("5559876", false).unwrap();

        let mut phones = manager.list_phones().unwrap();
        phones.sort();
        assert_eq!(phones, vec!["5551234", "5559876"]);
    }

    #[test]
    fn test_third_admin_phone_rolls_to_next_page() {
        let mut manager = test_manager();
        manager.enroll_admin("admin2").unwrap();
        manager.enroll_admin("admin3").unwrap();
        assert_eq!(manager.admin_count(), MAX_ADMINS);

        // slot 3 does not fit on the admin phone page; it lands in the
        // first slot of the following page
        manager.store_phone("5550003", true).unwrap();
        let raw = manager
            .store_mut()
            .read_raw(PHONE_BASE_PAGE + 1)
            .unwrap();
        assert!(!is_blank_slot(&raw[..PHONE_SLOT]));
        assert!(manager
            .list_phones()
            .unwrap()
            .contains(&"5550003".to_string()));
    }

    #[test]
    fn test_phone_validation() {
        let mut manager = test_manager();
        assert!(manager.store_phone("123456789", false).is_err());
        assert!(manager.store_phone("555\u{7}", false).is_err());
    }

    #[test]
    fn test_api_tokens() {
        let mut manager = test_manager();
        manager.store_admin_api_token("adm99999").unwrap();

        manager.set_card_key([1u8; 16]);
        manager.enroll_user("pw0", "card0", "api1234").unwrap();

        let tokens = manager.get_api_tokens(true).unwrap();
        // admin token first, cut to 7 chars; user token trimmed
        assert_eq!(tokens, vec!["adm9999", "api1234"]);

        let user_only = manager.get_api_tokens(false).unwrap();
        assert_eq!(user_only, vec!["api1234"]);
    }
}
