//! API key issuance and request authentication.
//!
//! Raw keys and signing secrets leave this module exactly once, in the
//! [`GeneratedKey`] returned at issuance. Authentication failures always
//! report the same generic message; the specific reason is only logged.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use docrelay_core::env::{bool_var, parse_var};
use docrelay_core::error::CoreError;
use docrelay_core::signing::{
    extract_prefix, generate_api_key, generate_signing_secret, hash_api_key,
    timestamp_within_skew, verify_body,
};
use docrelay_core::types::{new_id, EntityId};
use docrelay_store::api_keys::ApiKeyStore;
use docrelay_store::models::api_key::{ApiKeyInfo, ApiKeyRecord, Permission, RateLimitTier};

use super::rate_limit::RateLimiter;

/// The only failure message callers ever see.
pub const AUTH_FAILED: &str = "Authentication failed";

/// Default tolerated clock skew for signed requests, in seconds.
const DEFAULT_MAX_SKEW_SECS: i64 = 300;

/// Settings for inbound request authentication.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Demand `X-Signature`/`X-Timestamp` on callback endpoints.
    pub require_signature: bool,
    pub max_timestamp_skew_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_signature: true,
            max_timestamp_skew_secs: DEFAULT_MAX_SKEW_SECS,
        }
    }
}

impl AuthConfig {
    /// Load auth configuration from environment variables.
    ///
    /// | Env Var              | Default |
    /// |----------------------|---------|
    /// | `AUTH_REQUIRE_HMAC`  | `true`  |
    /// | `AUTH_MAX_SKEW_SECS` | `300`   |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            require_signature: bool_var("AUTH_REQUIRE_HMAC", true)?,
            max_timestamp_skew_secs: parse_var("AUTH_MAX_SKEW_SECS", DEFAULT_MAX_SKEW_SECS)?,
        })
    }
}

/// Request body for `POST /api/v1/api-keys`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateApiKey {
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub tier: RateLimitTier,
    /// Lifetime in days; `None` never expires.
    pub expires_in_days: Option<i64>,
}

/// A freshly issued key. The only place the raw key and secret appear.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedKey {
    pub key_id: EntityId,
    pub raw_key: String,
    pub signing_secret: String,
    pub info: ApiKeyInfo,
}

/// Everything needed to authenticate one inbound request.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationRequest {
    pub api_key: Option<String>,
    pub signature: Option<String>,
    /// Unix seconds, as sent in `X-Timestamp`.
    pub timestamp: Option<String>,
    pub method: String,
    pub path: String,
    /// Raw body bytes the signature covers.
    pub body: Vec<u8>,
    pub require_signature: bool,
}

/// Verdict for one request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationResult {
    pub authenticated: bool,
    pub key_id: Option<EntityId>,
    pub permissions: Vec<Permission>,
    pub error: Option<String>,
}

impl AuthenticationResult {
    fn granted(record: &ApiKeyRecord) -> Self {
        Self {
            authenticated: true,
            key_id: Some(record.id),
            permissions: record.permissions.clone(),
            error: None,
        }
    }

    fn denied() -> Self {
        Self {
            authenticated: false,
            key_id: None,
            permissions: Vec::new(),
            error: Some(AUTH_FAILED.to_string()),
        }
    }

    /// `admin` implies every other permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::Admin) || self.permissions.contains(&permission)
    }
}

pub struct AuthManager {
    store: Arc<ApiKeyStore>,
    config: AuthConfig,
    limiter: RateLimiter,
}

impl AuthManager {
    pub fn new(store: Arc<ApiKeyStore>, config: AuthConfig) -> Self {
        Self {
            store,
            config,
            limiter: RateLimiter::new(),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Key management
    // -----------------------------------------------------------------------

    pub async fn generate_api_key(&self, input: GenerateApiKey) -> Result<GeneratedKey, CoreError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("name must not be empty".into()));
        }
        if input.permissions.is_empty() {
            return Err(CoreError::Validation("at least one permission is required".into()));
        }
        if input.expires_in_days.is_some_and(|d| d <= 0) {
            return Err(CoreError::Validation("expires_in_days must be positive".into()));
        }

        let generated = generate_api_key();
        let signing_secret = generate_signing_secret();
        let now = Utc::now();
        let mut permissions = input.permissions;
        permissions.sort_by_key(|p| *p as u8);
        permissions.dedup();

        let record = ApiKeyRecord {
            id: new_id(),
            name: name.to_string(),
            description: input.description,
            key_prefix: generated.prefix,
            key_hash: generated.hash,
            signing_secret: signing_secret.clone(),
            permissions,
            tier: input.tier,
            created_at: now,
            expires_at: input.expires_in_days.map(|d| now + Duration::days(d)),
            last_used_at: None,
            usage_count: 0,
            is_active: true,
            revoked_at: None,
            revoked_reason: None,
        };
        let key_id = record.id;
        let info = self.store.insert(record).await?;

        tracing::info!(key_id = %key_id, name = %info.name, "API key generated");
        Ok(GeneratedKey {
            key_id,
            raw_key: generated.plaintext,
            signing_secret,
            info,
        })
    }

    pub async fn list_api_keys(&self) -> Vec<ApiKeyInfo> {
        self.store.list().await
    }

    pub async fn get_api_key_info(&self, id: EntityId) -> Result<ApiKeyInfo, CoreError> {
        self.store.get(id).await.ok_or_else(|| CoreError::NotFound {
            entity: "ApiKey",
            id: id.to_string(),
        })
    }

    /// Revocation is irreversible.
    pub async fn revoke_api_key(&self, id: EntityId, reason: Option<String>) -> Result<ApiKeyInfo, CoreError> {
        let info = self.store.revoke(id, reason).await?;
        self.limiter.forget(id).await;
        tracing::info!(key_id = %id, "API key revoked");
        Ok(info)
    }

    /// Register an operator-supplied admin key, unless its hash is already
    /// known. Without a secret one is generated, which only matters for
    /// signed endpoints.
    pub async fn import_bootstrap_key(
        &self,
        raw_key: &str,
        signing_secret: Option<String>,
    ) -> Result<ApiKeyInfo, CoreError> {
        let hash = hash_api_key(raw_key);
        if let Some(existing) = self.store.find_by_hash(&hash).await {
            return Ok(existing.info());
        }

        let record = ApiKeyRecord {
            id: new_id(),
            name: "bootstrap-admin".into(),
            description: Some("Imported from ADMIN_API_KEY".into()),
            key_prefix: extract_prefix(raw_key).to_string(),
            key_hash: hash,
            signing_secret: signing_secret.unwrap_or_else(generate_signing_secret),
            permissions: vec![Permission::Admin],
            tier: RateLimitTier::Unlimited,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            is_active: true,
            revoked_at: None,
            revoked_reason: None,
        };
        let info = self.store.insert(record).await?;
        tracing::info!(key_id = %info.id, "Bootstrap admin key imported");
        Ok(info)
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    pub async fn authenticate_request(&self, request: &AuthenticationRequest) -> AuthenticationResult {
        match self.check(request).await {
            Ok(record) => {
                self.store.record_usage(record.id, Utc::now()).await;
                AuthenticationResult::granted(&record)
            }
            Err(reason) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    key_prefix = request.api_key.as_deref().map(extract_prefix).unwrap_or(""),
                    reason,
                    "Request authentication rejected",
                );
                AuthenticationResult::denied()
            }
        }
    }

    /// The record on success, otherwise the reason for the log line.
    async fn check(&self, request: &AuthenticationRequest) -> Result<ApiKeyRecord, &'static str> {
        let raw = request
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or("missing API key")?;
        let record = self
            .store
            .find_by_hash(&hash_api_key(raw))
            .await
            .ok_or("unknown API key")?;

        if !record.is_active {
            return Err("API key revoked");
        }
        let now = Utc::now();
        if record.is_expired(now) {
            return Err("API key expired");
        }

        if request.require_signature && self.config.require_signature {
            let signature = request.signature.as_deref().ok_or("missing signature")?;
            let timestamp: i64 = request
                .timestamp
                .as_deref()
                .ok_or("missing timestamp")?
                .trim()
                .parse()
                .map_err(|_| "malformed timestamp")?;
            if !timestamp_within_skew(timestamp, now.timestamp(), self.config.max_timestamp_skew_secs) {
                return Err("timestamp outside allowed skew");
            }
            if !verify_body(&record.signing_secret, &request.body, signature) {
                return Err("signature mismatch");
            }
        }

        if !self.limiter.try_acquire(record.id, record.tier).await {
            return Err("rate limit exceeded");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use docrelay_core::signing::sign_body;

    fn manager() -> AuthManager {
        AuthManager::new(Arc::new(ApiKeyStore::new()), AuthConfig::default())
    }

    async fn issue(manager: &AuthManager, permissions: Vec<Permission>) -> GeneratedKey {
        manager
            .generate_api_key(GenerateApiKey {
                name: "n8n callbacks".into(),
                description: None,
                permissions,
                tier: RateLimitTier::Standard,
                expires_in_days: None,
            })
            .await
            .unwrap()
    }

    fn signed(key: &GeneratedKey, body: &[u8]) -> AuthenticationRequest {
        AuthenticationRequest {
            api_key: Some(key.raw_key.clone()),
            signature: Some(sign_body(&key.signing_secret, body)),
            timestamp: Some(Utc::now().timestamp().to_string()),
            method: "POST".into(),
            path: "/webhook/results".into(),
            body: body.to_vec(),
            require_signature: true,
        }
    }

    // -----------------------------------------------------------------------
    // Issuance
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn generated_key_is_stored_hashed() {
        let manager = manager();
        let key = issue(&manager, vec![Permission::SubmitResults]).await;
        assert_eq!(key.info.key_prefix, extract_prefix(&key.raw_key));
        let listed = manager.list_api_keys().await;
        assert_eq!(listed.len(), 1);
        assert!(!serde_json::to_string(&listed).unwrap().contains(&key.raw_key));
    }

    #[tokio::test]
    async fn issuance_requires_name_and_permissions() {
        let manager = manager();
        let err = manager
            .generate_api_key(GenerateApiKey {
                name: "  ".into(),
                description: None,
                permissions: vec![Permission::Admin],
                tier: RateLimitTier::Standard,
                expires_in_days: None,
            })
            .await;
        assert_matches!(err, Err(CoreError::Validation(_)));

        let err = manager
            .generate_api_key(GenerateApiKey {
                name: "empty".into(),
                description: None,
                permissions: vec![],
                tier: RateLimitTier::Standard,
                expires_in_days: None,
            })
            .await;
        assert_matches!(err, Err(CoreError::Validation(_)));
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn valid_signature_authenticates_and_counts_usage() {
        let manager = manager();
        let key = issue(&manager, vec![Permission::SubmitResults]).await;
        let result = manager.authenticate_request(&signed(&key, br#"{"ok":true}"#)).await;
        assert!(result.authenticated);
        assert_eq!(result.key_id, Some(key.key_id));
        assert!(result.has_permission(Permission::SubmitResults));
        assert!(!result.has_permission(Permission::Admin));

        let info = manager.get_api_key_info(key.key_id).await.unwrap();
        assert_eq!(info.usage_count, 1);
        assert!(info.last_used_at.is_some());
    }

    #[tokio::test]
    async fn tampered_body_is_rejected_generically() {
        let manager = manager();
        let key = issue(&manager, vec![Permission::SubmitResults]).await;
        let mut req = signed(&key, br#"{"progress":10}"#);
        req.body = br#"{"progress":99}"#.to_vec();
        let result = manager.authenticate_request(&req).await;
        assert!(!result.authenticated);
        assert_eq!(result.error.as_deref(), Some(AUTH_FAILED));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let manager = manager();
        let key = issue(&manager, vec![Permission::SubmitResults]).await;
        let mut req = signed(&key, b"{}");
        req.timestamp = Some((Utc::now().timestamp() - 3_600).to_string());
        assert!(!manager.authenticate_request(&req).await.authenticated);
    }

    #[tokio::test]
    async fn unknown_missing_and_revoked_keys_fail() {
        let manager = manager();
        let key = issue(&manager, vec![Permission::ReadStatus]).await;

        let mut req = signed(&key, b"{}");
        req.api_key = None;
        assert!(!manager.authenticate_request(&req).await.authenticated);

        req.api_key = Some("not-a-real-key".into());
        assert!(!manager.authenticate_request(&req).await.authenticated);

        manager
            .revoke_api_key(key.key_id, Some("rotated".into()))
            .await
            .unwrap();
        assert!(!manager.authenticate_request(&signed(&key, b"{}")).await.authenticated);
    }

    #[tokio::test]
    async fn unsigned_request_passes_when_signature_not_required() {
        let manager = manager();
        let key = issue(&manager, vec![Permission::Admin]).await;
        let req = AuthenticationRequest {
            api_key: Some(key.raw_key.clone()),
            method: "GET".into(),
            path: "/api/v1/jobs".into(),
            ..Default::default()
        };
        assert!(manager.authenticate_request(&req).await.authenticated);
    }

    #[tokio::test]
    async fn bootstrap_import_is_idempotent() {
        let manager = manager();
        let first = manager
            .import_bootstrap_key("bootstrap-admin-key-0001", Some("secret".into()))
            .await
            .unwrap();
        let second = manager
            .import_bootstrap_key("bootstrap-admin-key-0001", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.list_api_keys().await.len(), 1);
        assert_eq!(first.permissions, vec![Permission::Admin]);
    }
}
