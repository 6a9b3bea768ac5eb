//! Storage layer implementation

pub mod codec;
pub mod device;
pub mod page_store;
pub mod record;
pub mod schema;
