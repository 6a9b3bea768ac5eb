//! Common utilities and error handling for Lockvault

pub mod error;
pub mod logging;

pub mod test_utils;

pub use error::{Error, Result};
