#![forbid(unsafe_code)]

pub mod blob;
pub mod repository;
pub mod sqlite;

pub use blob::{Envelope, load_versioned, save_versioned};
pub use repository::{InMemoryRepository, KeyValueStore, Storage, StorageError};
