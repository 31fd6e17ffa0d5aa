use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::{AsyncCommands, Client as RedisClient};
use tokio::sync::RwLock;

use super::SessionData;
use crate::error::AppError;

const SESSION_KEY_PREFIX: &str = "session:";

/// Backing store for session payloads. Redis when configured, process memory
/// otherwise.
#[derive(Clone)]
pub enum SessionStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl SessionStore {
    pub async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError> {
        match self {
            SessionStore::Memory(store) => Ok(store.load(id).await),
            SessionStore::Redis(store) => store.load(id).await,
        }
    }

    pub async fn save(&self, id: &str, data: &SessionData) -> Result<(), AppError> {
        match self {
            SessionStore::Memory(store) => {
                store.save(id, data).await;
                Ok(())
            }
            SessionStore::Redis(store) => store.save(id, data).await,
        }
    }

    pub async fn remove(&self, id: &str) -> Result<(), AppError> {
        match self {
            SessionStore::Memory(store) => {
                store.remove(id).await;
                Ok(())
            }
            SessionStore::Redis(store) => store.remove(id).await,
        }
    }
}

#[derive(Debug)]
struct MemoryEntry {
    data: SessionData,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct MemoryStore {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn load(&self, id: &str) -> Option<SessionData> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.data.clone())
    }

    async fn save(&self, id: &str, data: &SessionData) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            id.to_string(),
            MemoryEntry {
                data: data.clone(),
                expires_at: now + self.ttl,
            },
        );
    }

    async fn remove(&self, id: &str) {
        self.entries.write().await.remove(id);
    }
}

#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<RedisClient>,
    ttl_secs: u64,
}

impl RedisStore {
    pub fn new(redis: Arc<RedisClient>, ttl: Duration) -> Self {
        Self {
            redis,
            ttl_secs: ttl.as_secs().max(1),
        }
    }

    fn key(id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, id)
    }

    async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.get(Self::key(id)).await?;

        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), AppError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(data)?;
        let _: () = conn.set_ex(Self::key(id), json, self.ttl_secs).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), AppError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: () = conn.del(Self::key(id)).await?;
        Ok(())
    }
}
