//! API key models.
//!
//! Only the SHA-256 hash of a raw key is stored. The signing secret is kept
//! in the clear because it is needed to recompute callback signatures.

use serde::{Deserialize, Serialize};

use docrelay_core::types::{EntityId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SubmitResults,
    ReadStatus,
    SubmitDocuments,
    Admin,
}

/// Rate-limit tier applied per key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    #[default]
    Standard,
    Elevated,
    Unlimited,
}

impl RateLimitTier {
    /// Sustained requests per minute, `None` when unlimited.
    pub fn requests_per_minute(&self) -> Option<u32> {
        match self {
            Self::Standard => Some(120),
            Self::Elevated => Some(1200),
            Self::Unlimited => None,
        }
    }
}

/// A stored API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub key_prefix: String,
    pub key_hash: String,
    pub signing_secret: String,
    pub permissions: Vec<Permission>,
    pub tier: RateLimitTier,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub last_used_at: Option<Timestamp>,
    pub usage_count: u64,
    pub is_active: bool,
    pub revoked_at: Option<Timestamp>,
    pub revoked_reason: Option<String>,
}

impl ApiKeyRecord {
    /// `admin` implies every other permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::Admin) || self.permissions.contains(&permission)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn info(&self) -> ApiKeyInfo {
        ApiKeyInfo {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            key_prefix: self.key_prefix.clone(),
            permissions: self.permissions.clone(),
            tier: self.tier,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            usage_count: self.usage_count,
            is_active: self.is_active,
            revoked_at: self.revoked_at,
            revoked_reason: self.revoked_reason.clone(),
        }
    }
}

/// Public view of a key; never carries the hash or secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKeyInfo {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub key_prefix: String,
    pub permissions: Vec<Permission>,
    pub tier: RateLimitTier,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub last_used_at: Option<Timestamp>,
    pub usage_count: u64,
    pub is_active: bool,
    pub revoked_at: Option<Timestamp>,
    pub revoked_reason: Option<String>,
}
