//! API key records, looked up by key hash on every authenticated request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use docrelay_core::types::{EntityId, Timestamp};

use crate::error::StoreError;
use crate::models::api_key::{ApiKeyInfo, ApiKeyRecord};

pub struct ApiKeyStore {
    keys: RwLock<HashMap<EntityId, ApiKeyRecord>>,
    revision: AtomicU64,
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Store a new key. Rejects a hash that is already registered.
    pub async fn insert(&self, record: ApiKeyRecord) -> Result<ApiKeyInfo, StoreError> {
        let mut keys = self.keys.write().await;
        if keys.values().any(|k| k.key_hash == record.key_hash) {
            return Err(StoreError::Invalid("API key already registered".into()));
        }
        let info = record.info();
        keys.insert(record.id, record);
        drop(keys);
        self.touch();
        Ok(info)
    }

    pub async fn find_by_hash(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        let keys = self.keys.read().await;
        keys.values().find(|k| k.key_hash == key_hash).cloned()
    }

    pub async fn get(&self, id: EntityId) -> Option<ApiKeyInfo> {
        self.keys.read().await.get(&id).map(ApiKeyRecord::info)
    }

    /// All keys, newest first.
    pub async fn list(&self) -> Vec<ApiKeyInfo> {
        let keys = self.keys.read().await;
        let mut infos: Vec<ApiKeyInfo> = keys.values().map(ApiKeyRecord::info).collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        infos
    }

    /// Deactivate a key. Revoking twice keeps the first timestamp and reason.
    pub async fn revoke(&self, id: EntityId, reason: Option<String>) -> Result<ApiKeyInfo, StoreError> {
        let mut keys = self.keys.write().await;
        let record = keys
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ApiKey", id))?;
        if record.is_active {
            record.is_active = false;
            record.revoked_at = Some(Utc::now());
            record.revoked_reason = reason;
        }
        let info = record.info();
        drop(keys);
        self.touch();
        Ok(info)
    }

    /// Stamp a successful authentication.
    pub async fn record_usage(&self, id: EntityId, at: Timestamp) {
        let mut keys = self.keys.write().await;
        if let Some(record) = keys.get_mut(&id) {
            record.usage_count += 1;
            record.last_used_at = Some(at);
            drop(keys);
            self.touch();
        }
    }

    pub async fn snapshot(&self) -> Vec<ApiKeyRecord> {
        let keys = self.keys.read().await;
        let mut records: Vec<ApiKeyRecord> = keys.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub async fn restore(&self, records: Vec<ApiKeyRecord>) {
        let mut keys = self.keys.write().await;
        *keys = records.into_iter().map(|r| (r.id, r)).collect();
        drop(keys);
        self.touch();
    }
}
