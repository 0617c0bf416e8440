mod codec;
pub mod postgres_store;
mod repository;
pub mod sqlite_store;
pub mod store;

pub use repository::{BackupRepository, BATCH_SIZE};
pub use store::{DocumentStore, Filter, InsertManyOutcome, WriteFailure};
