//! Job execution engine.
//!
//! Contains the dispatcher that moves accepted jobs to the remote workflow
//! engine, the feeder that turns queued documents into jobs, and the
//! callback processor that applies the engine's results.

pub mod callbacks;
pub mod dispatcher;
pub mod feeder;
