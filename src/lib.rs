//! Lockvault - EEPROM persistence layer for an access-control appliance
//!
//! Lockvault stores the entire state of a keypad/RFID door controller on a
//! small serial EEPROM: site identity, administrator and user credentials,
//! a phone directory, API tokens, and a ring-buffered audit log. There is
//! no filesystem; everything lives at fixed byte offsets in 64-byte
//! logical pages.
//!
//! The crate is layered bottom-up:
//! - [`storage::device`] - raw byte transport (real bus or test double)
//! - [`storage::page_store`] - physical-page-aware writes with settle delay
//! - [`storage::record`] - 64-byte records, partial updates, AES segments
//! - [`storage::schema`] - the region map and every domain operation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Core modules
pub mod common;
pub mod storage;

// Re-exports for convenience
pub use common::{Error, Result};
pub use storage::schema::SchemaManager;

/// Version information
pub const VERSION_MAJOR: u32 = 0;
/// Version information
pub const VERSION_MINOR: u32 = 1;
/// Version information
pub const VERSION_PATCH: u32 = 0;
/// Version string
pub const VERSION: &str = "0.1.0";
