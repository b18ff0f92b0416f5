//! Authentication and authorization primitives.
//!
//! - [`manager`] -- API key issuance, revocation and request authentication.
//! - [`rate_limit`] -- per-key token buckets.

pub mod manager;
pub mod rate_limit;

pub use manager::{
    AuthConfig, AuthManager, AuthenticationRequest, AuthenticationResult, GenerateApiKey,
    GeneratedKey,
};
