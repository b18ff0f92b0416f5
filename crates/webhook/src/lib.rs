//! HTTP client for the remote workflow engine.
//!
//! [`service::WebhookService`] builds, validates and signs outbound
//! payloads and talks to the engine's webhook and execution endpoints. The
//! dispatcher depends only on the [`engine::WorkflowEngine`] trait so tests
//! can substitute a scripted engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod service;

pub use config::{WebhookAuthConfig, WebhookConfig};
pub use engine::WorkflowEngine;
pub use error::WebhookError;
pub use service::WebhookService;
