//! Repository layer for database operations

pub mod records;

pub use records::SqliteRecordStore;
