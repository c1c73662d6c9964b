pub mod backends;
pub mod config;
pub mod error;
pub mod record;
pub mod store;
pub mod types;

pub use backends::{FileBackingStore, MemoryBackingStore};
pub use config::SpoolConfig;
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use record::SpoolRecord;
pub use store::BackingStore;
pub use types::SpooledMessageId;
