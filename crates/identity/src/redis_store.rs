//! Redis-backed identity store for deployments running more than one
//! forwarder node. Session-scoped keys carry a TTL refreshed on every read;
//! indefinite keys carry none.

use async_trait::async_trait;
use forwarder_core::config::IdentityConfig;
use forwarder_core::{ForwarderError, ForwarderResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::{debug, info};

use crate::store::{IdentityKey, IdentityStore, Scope};

fn storage_error(e: RedisError) -> ForwarderError {
    ForwarderError::Storage(e.to_string())
}

pub struct RedisIdentityStore {
    conn: ConnectionManager,
    key_prefix: String,
    session_ttl_secs: u64,
}

impl RedisIdentityStore {
    /// Connect to Redis and verify connectivity.
    pub async fn new(config: &IdentityConfig) -> ForwarderResult<Self> {
        info!(url = %config.redis_url, "Connecting to Redis identity store");

        let client = redis::Client::open(config.redis_url.as_str()).map_err(storage_error)?;
        let mut conn = ConnectionManager::new(client).await.map_err(storage_error)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(storage_error)?;
        info!(response = %pong, "Redis identity store connected");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            session_ttl_secs: config.session_ttl_secs,
        })
    }

    fn key(&self, visitor_id: &str, key: IdentityKey) -> String {
        storage_key(&self.key_prefix, visitor_id, key)
    }
}

/// `{prefix}:{visitor}:{scope}:{key}`
fn storage_key(prefix: &str, visitor_id: &str, key: IdentityKey) -> String {
    format!(
        "{prefix}:{visitor_id}:{}:{}",
        key.scope().as_str(),
        key.as_str()
    )
}

#[async_trait]
impl IdentityStore for RedisIdentityStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, visitor_id: &str, key: IdentityKey) -> ForwarderResult<Option<String>> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(visitor_id, key);
        let value: Option<String> = match key.scope() {
            Scope::Session => redis::cmd("GETEX")
                .arg(&redis_key)
                .arg("EX")
                .arg(self.session_ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(storage_error)?,
            Scope::Infinite => conn.get(&redis_key).await.map_err(storage_error)?,
        };
        Ok(value)
    }

    async fn set(&self, visitor_id: &str, key: IdentityKey, value: &str) -> ForwarderResult<()> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(visitor_id, key);
        match key.scope() {
            Scope::Session => conn
                .set_ex::<_, _, ()>(&redis_key, value, self.session_ttl_secs)
                .await
                .map_err(storage_error)?,
            Scope::Infinite => conn
                .set::<_, _, ()>(&redis_key, value)
                .await
                .map_err(storage_error)?,
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        visitor_id: &str,
        key: IdentityKey,
        value: &str,
    ) -> ForwarderResult<String> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(visitor_id, key);

        let mut cmd = redis::cmd("SET");
        cmd.arg(&redis_key).arg(value).arg("NX");
        if key.scope() == Scope::Session {
            cmd.arg("EX").arg(self.session_ttl_secs);
        }
        let created: Option<String> = cmd.query_async(&mut conn).await.map_err(storage_error)?;
        if created.is_some() {
            return Ok(value.to_string());
        }

        let existing: Option<String> = conn.get(&redis_key).await.map_err(storage_error)?;
        debug!(key = %redis_key, "Identity already stored, keeping existing value");
        // The existing key may have expired between SET NX and GET.
        Ok(existing.unwrap_or_else(|| value.to_string()))
    }

    async fn increment(&self, visitor_id: &str, key: IdentityKey) -> ForwarderResult<u64> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(visitor_id, key);
        if key != IdentityKey::EventCounter {
            return Err(ForwarderError::Storage(format!(
                "{} is not a counter",
                key.as_str()
            )));
        }
        let value: u64 = conn.incr(&redis_key, 1u64).await.map_err(storage_error)?;
        Ok(value)
    }

    async fn end_session(&self, visitor_id: &str) -> ForwarderResult<()> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(visitor_id, IdentityKey::SessionId);
        conn.del::<_, ()>(&redis_key).await.map_err(storage_error)?;
        Ok(())
    }
}
