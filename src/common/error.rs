//! Error handling for Lockvault storage operations

/// Common result type for Lockvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Lockvault storage operations
///
/// Note that UTF-8 decode failures and authentication mismatches are not
/// errors here: undecodable units are dropped silently and a wrong
/// credential yields `Ok(None)`, since both are expected outcomes on a
/// provisioned device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Underlying device I/O failed; propagates through every layer uncaught
    #[error("device error: {0}")]
    Device(String),
    /// A partial-page update would run past the 64-byte logical page
    #[error("range error: offset {offset} + {len} bytes exceeds logical page size {page_size}")]
    Range {
        /// Requested start offset within the logical page
        offset: usize,
        /// Length of the data to write
        len: usize,
        /// The logical page size that would be exceeded
        page_size: usize,
    },
    /// Invalid input or arguments
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),
    /// On-device data failed to parse (general-info counters and the like)
    #[error("corruption: {0}")]
    Corruption(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Device(err.to_string())
    }
}

impl Error {
    /// Create a device I/O error
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Error::Device(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a corruption error
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Check if this is a device I/O error
    pub fn is_device(&self) -> bool {
        matches!(self, Error::Device(_))
    }

    /// Check if this is a range error
    pub fn is_range(&self) -> bool {
        matches!(self, Error::Range { .. })
    }

    /// Check if this is a corruption error
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}
