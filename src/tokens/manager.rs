//! Signing key lifecycle and the append-only verification key cache.
//!
//! New tokens are always signed with the latest key in the store, read on each
//! issuance so rotations by other processes are picked up. Verification looks
//! up the token's `kid` in an in-memory table; a miss falls through to the
//! store and the result is appended. Entries are never evicted.

use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::signing_key::{DEFAULT_KEY_BITS, LoadedKey, SigningKey};
use crate::error::AuthError;
use crate::store::SigningKeyStore;

pub struct SigningKeyManager {
    store: Arc<dyn SigningKeyStore>,
    key_bits: usize,
    known: RwLock<HashMap<String, Arc<LoadedKey>>>,
    // Serializes generation in this process; readers never take it.
    generation: Mutex<()>,
}

impl SigningKeyManager {
    #[must_use]
    pub fn new(store: Arc<dyn SigningKeyStore>) -> Self {
        Self {
            store,
            key_bits: DEFAULT_KEY_BITS,
            known: RwLock::new(HashMap::new()),
            generation: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Generate a first key if the store is empty, then load every stored key.
    /// Safe to call concurrently and from several processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or key generation fails.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let _guard = self.generation.lock().await;

        if self.store.latest().await?.is_none() {
            let key = self.generate().await?;
            if self.store.insert_first(&key).await? {
                info!(key_id = %key.key_id, "generated initial signing key");
            } else {
                debug!("another instance bootstrapped the signing key set");
            }
        }

        let keys = self.store.all().await?;
        for key in &keys {
            self.remember(key).await?;
        }
        debug!(count = keys.len(), "signing keys loaded");
        Ok(())
    }

    /// Generate, persist and return a new key. It becomes the latest key as
    /// soon as it is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or the key cannot be stored.
    pub async fn generate_key(&self) -> Result<SigningKey, AuthError> {
        let _guard = self.generation.lock().await;
        let key = self.generate().await?;
        self.store.insert(&key).await?;
        self.remember(&key).await?;
        info!(key_id = %key.key_id, "generated signing key");
        Ok(key)
    }

    /// The most recently created key.
    ///
    /// # Errors
    ///
    /// Returns `NoKeyAvailable` if the store holds no key.
    pub async fn latest_key(&self) -> Result<SigningKey, AuthError> {
        self.store.latest().await?.ok_or(AuthError::NoKeyAvailable)
    }

    /// Parsed material for the latest key.
    pub(crate) async fn active_key(&self) -> Result<Arc<LoadedKey>, AuthError> {
        let key = self.latest_key().await?;
        if let Some(loaded) = self.known.read().await.get(&key.key_id) {
            return Ok(Arc::clone(loaded));
        }
        self.remember(&key).await
    }

    /// Resolve a verification key by id, consulting the store on a cache miss.
    pub(crate) async fn verification_key(
        &self,
        key_id: &str,
    ) -> Result<Option<Arc<LoadedKey>>, AuthError> {
        if let Some(loaded) = self.known.read().await.get(key_id) {
            return Ok(Some(Arc::clone(loaded)));
        }

        match self.store.get(key_id).await? {
            Some(key) => Ok(Some(self.remember(&key).await?)),
            None => Ok(None),
        }
    }

    async fn generate(&self) -> Result<SigningKey, AuthError> {
        let bits = self.key_bits;
        tokio::task::spawn_blocking(move || SigningKey::generate(bits))
            .await
            .map_err(|err| AuthError::Signing(anyhow!("key generation task failed: {err}")))?
            .map_err(AuthError::Signing)
    }

    async fn remember(&self, key: &SigningKey) -> Result<Arc<LoadedKey>, AuthError> {
        let loaded = Arc::new(key.load().map_err(AuthError::Signing)?);
        let mut known = self.known.write().await;
        Ok(Arc::clone(
            known.entry(key.key_id.clone()).or_insert(loaded),
        ))
    }
}
