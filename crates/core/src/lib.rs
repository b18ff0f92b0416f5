//! Domain types and pure logic shared by every docrelay crate.
//!
//! Apart from environment lookups nothing in here performs I/O. Payload
//! shapes, the job state machine, priority ordering, HMAC signing, duration
//! estimates and the schema registry live here so the store, webhook client
//! and API layers agree on one definition.

pub mod env;
pub mod error;
pub mod estimation;
pub mod payloads;
pub mod scheduling;
pub mod schema;
pub mod signing;
pub mod types;
pub mod workflow;
