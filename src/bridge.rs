//! Queue bridge: hands batch payloads to each driver's downstream channel
//!
//! Every driver has its own key/value broker address. A batch payload is written under
//! the driver's name, so the latest payload for a driver wins. Delivery is at least once.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Channel carrying serialized batch payloads to drivers
#[async_trait]
pub trait QueueBridge: Send + Sync {
    /// Store `value` under `key` on the broker at `address`
    async fn publish(
        &self,
        address: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Redis-backed bridge
///
/// Keeps one `ConnectionManager` per broker address; connections are opened on first use
/// and reconnect automatically afterwards.
#[derive(Default)]
pub struct RedisQueueBridge {
    connections: Mutex<HashMap<String, redis::aio::ConnectionManager>>,
}

impl RedisQueueBridge {
    /// Bridge with no open connections
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self, address: &str) -> Result<redis::aio::ConnectionManager> {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(address) {
            return Ok(conn.clone());
        }

        let client = redis::Client::open(address).map_err(|e| {
            Error::QueueBridge(format!("invalid broker address {}: {}", redact(address), e))
        })?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                Error::QueueBridge(format!("failed to connect to {}: {}", redact(address), e))
            })?;

        tracing::debug!(address = %redact(address), "Queue bridge connected");
        connections.insert(address.to_string(), conn.clone());
        Ok(conn)
    }
}

impl std::fmt::Debug for RedisQueueBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueBridge").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueBridge for RedisQueueBridge {
    async fn publish(
        &self,
        address: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.connection(address).await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::QueueBridge(format!("SET {} failed: {}", key, e)))?;

        tracing::debug!(key, bytes = value.len(), ttl = ?ttl, "Payload published");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Strip credentials from a broker URL before logging it
fn redact(address: &str) -> String {
    match (address.find("://"), address.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &address[..scheme_end + 3], &address[at..])
        }
        _ => address.to_string(),
    }
}

/// A payload captured by [`MemoryQueueBridge`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    /// Broker address
    pub address: String,
    /// Key (driver name)
    pub key: String,
    /// Serialized payload
    pub value: String,
    /// Requested expiry
    pub ttl: Option<Duration>,
}

/// In-process bridge recording every publish, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryQueueBridge {
    published: Mutex<Vec<Published>>,
    fail: Mutex<bool>,
}

impl MemoryQueueBridge {
    /// Empty bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish so far, in order
    pub async fn published(&self) -> Vec<Published> {
        self.published.lock().await.clone()
    }

    /// Latest value per key
    pub async fn latest(&self, key: &str) -> Option<String> {
        self.published
            .lock()
            .await
            .iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.value.clone())
    }

    /// Make subsequent publishes fail (or succeed again)
    pub async fn set_failing(&self, failing: bool) {
        *self.fail.lock().await = failing;
    }
}

#[async_trait]
impl QueueBridge for MemoryQueueBridge {
    async fn publish(
        &self,
        address: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if *self.fail.lock().await {
            return Err(Error::QueueBridge(format!("broker {} unavailable", address)));
        }
        self.published.lock().await.push(Published {
            address: address.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_credentials() {
        assert_eq!(redact("redis://user:pw@host:6379/1"), "redis://***@host:6379/1");
        assert_eq!(redact("redis://host:6379/1"), "redis://host:6379/1");
    }

    #[tokio::test]
    async fn memory_bridge_keeps_last_write_per_key() {
        let bridge = MemoryQueueBridge::new();
        bridge.publish("mem://a", "pages", "one", None).await.unwrap();
        bridge
            .publish("mem://a", "pages", "two", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        bridge.publish("mem://b", "video", "three", None).await.unwrap();

        assert_eq!(bridge.latest("pages").await.as_deref(), Some("two"));
        assert_eq!(bridge.latest("video").await.as_deref(), Some("three"));
        assert_eq!(bridge.published().await.len(), 3);
        assert_eq!(bridge.published().await[1].ttl, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn memory_bridge_can_fail() {
        let bridge = MemoryQueueBridge::new();
        bridge.set_failing(true).await;
        let err = bridge.publish("mem://a", "pages", "x", None).await.unwrap_err();
        assert!(matches!(err, Error::QueueBridge(_)));
        assert!(bridge.published().await.is_empty());
    }

    #[tokio::test]
    async fn redis_bridge_rejects_invalid_address() {
        let bridge = RedisQueueBridge::new();
        let err = bridge
            .publish("not a url", "pages", "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueBridge(_)));
    }
}
