//! `Dragonfly` (Redis-compatible) key operations.
//!
//! The gateway only needs JSON values with an expiry: a stale key must
//! disappear on its own when the process that wrote it dies.

use fred::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and provides typed JSON operations.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Serialize `value` as JSON and store it at `key` with an expiry.
    ///
    /// A `ttl_secs` of zero is rejected because the key would never expire
    /// and a crashed writer would leave it looking alive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for a zero TTL.
    /// Returns [`StoreError::Serialization`] if serialization fails.
    /// Returns [`StoreError::Dragonfly`] if the write fails.
    pub async fn set_json_with_ttl<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        if ttl_secs == 0 {
            return Err(StoreError::Config(format!("TTL for {key} must be non-zero")));
        }
        let json = serde_json::to_string(value)?;
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let _: () = self
            .client
            .set(key, json.as_str(), Some(Expiration::EX(ttl)), None, false)
            .await?;
        Ok(())
    }

    /// Read the value at `key` and deserialize from JSON.
    ///
    /// Returns `Ok(None)` when the key does not exist or has expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if deserialization fails.
    /// Returns [`StoreError::Dragonfly`] if the read fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        value
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Delete a key from `Dragonfly`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }

    /// Close the connection, waiting for in-flight commands.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the quit command fails.
    pub async fn quit(&self) -> Result<(), StoreError> {
        self.client.quit().await?;
        Ok(())
    }
}

impl std::fmt::Debug for DragonflyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyPool").finish_non_exhaustive()
    }
}
