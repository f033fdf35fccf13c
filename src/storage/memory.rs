use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use tracing::{debug, trace};

use super::traits::{SessionStore, storage_key, validate_ttl};
use crate::errors::Result;

#[derive(Debug, Clone)]
struct StoredSession {
    payload: String,
    ttl: Option<Duration>,
}

/// 按每次写入携带的 TTL 计算过期时间
struct SessionExpiry;

impl Expiry<String, StoredSession> for SessionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredSession,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredSession,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // 每次保存都刷新过期时间
        value.ttl
    }
}

/// 进程内会话存储（moka）
pub struct MemorySessionStore {
    inner: Cache<String, StoredSession>,
}

impl MemorySessionStore {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(SessionExpiry)
            .build();

        debug!(
            "MemorySessionStore initialized with max capacity: {}",
            max_capacity
        );
        Self { inner }
    }

    /// 直接写入原始内容（测试中用于构造损坏数据）
    pub async fn insert_raw(&self, id: &str, context: &str, payload: &str) {
        self.inner
            .insert(
                storage_key(context, id),
                StoredSession {
                    payload: payload.to_string(),
                    ttl: None,
                },
            )
            .await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str, context: &str) -> Result<Option<String>> {
        let key = storage_key(context, id);
        let value = self.inner.get(&key).await.map(|s| s.payload);
        trace!("Memory load {}: {}", key, value.is_some());
        Ok(value)
    }

    async fn save(
        &self,
        id: &str,
        context: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool> {
        validate_ttl(ttl_secs)?;
        let key = storage_key(context, id);
        self.inner
            .insert(
                key,
                StoredSession {
                    payload: value.to_string(),
                    ttl: ttl_secs.map(Duration::from_secs),
                },
            )
            .await;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
