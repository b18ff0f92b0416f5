//! Authentication and authorization extractors.
//!
//! - [`api_key::ApiKeyAuth`] -- any active API key.
//! - [`api_key::RequireAdminKey`] -- requires the `admin` permission.
//! - [`api_key::RequireSubmitDocuments`] -- may enqueue documents.
//! - [`api_key::RequireReadStatus`] -- may read job and queue state.

pub mod api_key;
