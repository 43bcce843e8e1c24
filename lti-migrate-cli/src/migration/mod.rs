//! Course-by-course replacement of one LTI tool's navigation placement with another's

pub mod enumerator;
pub mod executor;
pub mod inspector;
pub mod runner;
pub mod store;
pub mod summary;

#[cfg(test)]
pub mod testing;

pub use enumerator::{PostgresConnector, select_enumerator};
pub use runner::MigrationRunner;
pub use store::RecordStore;
pub use summary::RunSummary;
