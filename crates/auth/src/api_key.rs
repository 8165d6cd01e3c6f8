//! API key authentication for the operator dashboard.
//!
//! The engine is operated by a single trading desk, not a multi-tenant
//! userbase, so there is no role hierarchy here — a key is either valid or
//! it isn't. Keys are held in memory; restarting the process invalidates
//! all previously issued keys.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An API key for programmatic access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    /// Display name for the key (e.g. "dashboard", "on-call laptop").
    pub name: String,
    /// Hash of the key (the plain key is only shown once, at creation).
    pub key_hash: String,
    /// Key prefix for identification (first 8 chars).
    pub key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl ApiKey {
    /// Create a new API key and return the plain text key (shown once).
    pub fn new(name: String) -> (Self, String) {
        let plain_key = Self::generate_key();
        let key_hash = Self::hash_key(&plain_key);
        let key_prefix = plain_key[..8].to_string();

        let api_key = Self {
            id: Uuid::new_v4(),
            name,
            key_hash,
            key_prefix,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            active: true,
        };

        (api_key, plain_key)
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_valid(&self) -> bool {
        if !self.active {
            return false;
        }
        if let Some(expires) = self.expires_at {
            if Utc::now() > expires {
                return false;
            }
        }
        true
    }

    pub fn verify(&self, plain_key: &str) -> bool {
        let hash = Self::hash_key(plain_key);
        self.key_hash == hash
    }

    pub fn touch(&mut self) {
        self.last_used_at = Some(Utc::now());
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    fn generate_key() -> String {
        use rand::distr::Alphanumeric;
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// API key authentication handler, keyed by key hash for O(1) lookup.
pub struct ApiKeyAuth {
    keys_by_hash: Arc<RwLock<HashMap<String, ApiKey>>>,
}

impl ApiKeyAuth {
    pub fn new() -> Self {
        Self {
            keys_by_hash: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed a single key from a pre-shared plaintext secret (e.g. from
    /// `OPERATOR_API_KEY`), rather than generating one. Used at startup so
    /// the operator doesn't need a bootstrapping endpoint just to get in.
    pub async fn register_preshared(&self, plain_key: &str, name: &str) {
        let key_hash = ApiKey::hash_key(plain_key);
        let key_prefix = plain_key.chars().take(8).collect::<String>();
        let api_key = ApiKey {
            id: Uuid::new_v4(),
            name: name.to_string(),
            key_hash: key_hash.clone(),
            key_prefix,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            active: true,
        };
        self.keys_by_hash.write().await.insert(key_hash, api_key);
        info!(name, "Registered pre-shared operator API key");
    }

    pub async fn create_key(&self, name: &str) -> (ApiKey, String) {
        let (api_key, plain_key) = ApiKey::new(name.to_string());
        self.keys_by_hash
            .write()
            .await
            .insert(api_key.key_hash.clone(), api_key.clone());

        info!(key_id = %api_key.id, prefix = %api_key.key_prefix, "Created new API key");
        (api_key, plain_key)
    }

    pub async fn authenticate(&self, plain_key: &str) -> Option<ApiKey> {
        let hash = ApiKey::hash_key(plain_key);
        let mut keys = self.keys_by_hash.write().await;

        if let Some(key) = keys.get_mut(&hash) {
            if key.is_valid() && key.verify(plain_key) {
                key.touch();
                debug!(key_prefix = %key.key_prefix, "API key authenticated");
                return Some(key.clone());
            }
        }

        warn!("API key authentication failed");
        None
    }

    pub async fn list_keys(&self) -> Vec<ApiKey> {
        self.keys_by_hash.read().await.values().cloned().collect()
    }

    pub async fn revoke_key(&self, key_id: Uuid) -> bool {
        let mut keys = self.keys_by_hash.write().await;
        for key in keys.values_mut() {
            if key.id == key_id {
                key.deactivate();
                info!(key_id = %key_id, "API key revoked");
                return true;
            }
        }
        false
    }

    pub async fn count_active_keys(&self) -> usize {
        self.keys_by_hash
            .read()
            .await
            .values()
            .filter(|k| k.is_valid())
            .count()
    }
}

impl Default for ApiKeyAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let auth = ApiKeyAuth::new();

        let (api_key, plain_key) = auth.create_key("Test Key").await;

        assert_eq!(api_key.name, "Test Key");
        assert!(api_key.active);

        let result = auth.authenticate(&plain_key).await;
        assert!(result.is_some());
        assert_eq!(result.unwrap().id, api_key.id);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let auth = ApiKeyAuth::new();
        auth.create_key("Test Key").await;

        let result = auth.authenticate("invalid-key").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_revoked_key_rejected() {
        let auth = ApiKeyAuth::new();
        let (api_key, plain_key) = auth.create_key("Test Key").await;

        auth.revoke_key(api_key.id).await;

        let result = auth.authenticate(&plain_key).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_expired_key_rejected() {
        let auth = ApiKeyAuth::new();

        let (mut api_key, plain_key) = ApiKey::new("Test Key".to_string());
        api_key.expires_at = Some(Utc::now() - chrono::Duration::hours(1));

        {
            let mut keys = auth.keys_by_hash.write().await;
            keys.insert(api_key.key_hash.clone(), api_key);
        }

        let result = auth.authenticate(&plain_key).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_register_preshared() {
        let auth = ApiKeyAuth::new();
        auth.register_preshared("s3cret-operator-token", "env").await;

        assert!(auth.authenticate("s3cret-operator-token").await.is_some());
        assert_eq!(auth.count_active_keys().await, 1);
    }

    #[tokio::test]
    async fn test_delete_via_revoke_then_count() {
        let auth = ApiKeyAuth::new();
        let (api_key, _) = auth.create_key("Test Key").await;

        assert_eq!(auth.count_active_keys().await, 1);
        auth.revoke_key(api_key.id).await;
        assert_eq!(auth.count_active_keys().await, 0);
    }
}
