//! In-memory stores for queue items, jobs and API keys, plus the JSON
//! snapshot persister that makes them survive restarts.
//!
//! Each store guards its state with a `tokio::sync::RwLock` and bumps a
//! revision counter on every mutation so the persister can skip snapshots
//! when nothing changed.

pub mod api_keys;
pub mod error;
pub mod models;
pub mod queue;
pub mod snapshot;
pub mod tracker;

pub use error::StoreError;
