use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tokio::sync::RwLock;
use tracing::{debug, error, trace};

use super::traits::{SessionStore, storage_key, validate_ttl};
use crate::errors::{CalibanError, Result};

/// Redis 会话存储
///
/// 使用持久的多路复用连接，命令失败后丢弃连接，下次调用时重新建立。
pub struct RedisSessionStore {
    client: redis::Client,
    /// 持久化连接，使用 RwLock 保护
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    key_prefix: String,
}

impl RedisSessionStore {
    /// 创建客户端并立即检查连通性
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            CalibanError::configuration(format!("Invalid Redis URL '{}': {}", url, e))
        })?;

        let store = Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            key_prefix: key_prefix.to_string(),
        };

        if let Err(e) = store.ping().await {
            error!(
                "Failed to ping Redis server: {}. Check Redis server status and URL: {}",
                e, url
            );
            return Err(e);
        }

        debug!("RedisSessionStore connected with prefix: '{}'", key_prefix);
        Ok(store)
    }

    /// 获取或建立持久连接
    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // 双重检查，避免竞态条件
        if let Some(ref conn) = *conn_guard {
            return Ok(conn.clone());
        }

        let new_conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CalibanError::storage_connection(e.to_string()))?;
        *conn_guard = Some(new_conn.clone());
        debug!("Redis connection established and cached");

        Ok(new_conn)
    }

    /// 重置连接（在连接错误时调用）
    async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
        debug!("Redis connection reset due to error");
    }

    fn make_key(&self, context: &str, id: &str) -> String {
        format!("{}{}", self.key_prefix, storage_key(context, id))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str, context: &str) -> Result<Option<String>> {
        let key = self.make_key(context, id);
        let mut conn = self.get_connection().await?;

        let result: redis::RedisResult<Option<String>> = conn.get(&key).await;
        match result {
            Ok(value) => {
                trace!("Redis load {}: {}", key, value.is_some());
                Ok(value)
            }
            Err(e) => {
                error!("Failed to get key '{}': {}", key, e);
                self.reset_connection().await;
                Err(e.into())
            }
        }
    }

    async fn save(
        &self,
        id: &str,
        context: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool> {
        validate_ttl(ttl_secs)?;
        let key = self.make_key(context, id);
        let mut conn = self.get_connection().await?;

        let result: redis::RedisResult<()> = match ttl_secs {
            Some(ttl) => conn.set_ex(&key, value, ttl).await,
            None => conn.set(&key, value).await,
        };

        match result {
            Ok(()) => {
                trace!("Redis saved {} (ttl: {:?})", key, ttl_secs);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to set key '{}': {}", key, e);
                self.reset_connection().await;
                Err(e.into())
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.reset_connection().await;
                Err(e.into())
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
