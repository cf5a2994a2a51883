pub mod batch;
pub mod build;
pub mod config;
pub mod ingest;
pub mod models;
pub mod records;
pub mod resolve;
pub mod store;

pub use batch::{BatchStats, BatchWriter, DEFAULT_BATCH_SIZE, RESOLVED_BATCH_SIZE};
pub use ingest::{Ingest, LoadSummary};
pub use resolve::{IdCache, RESOLVE_CHUNK_SIZE};
#[cfg(any(test, feature = "mock"))]
pub use store::MemStore;
pub use store::{PgStore, Store};
