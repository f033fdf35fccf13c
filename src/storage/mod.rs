//! 会话存储层
//!
//! 引擎只依赖 [`SessionStore`]，后端由配置选择：
//! - memory：进程内 moka 缓存（默认）
//! - redis：多实例部署共享会话

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use crate::errors::{CalibanError, Result};

pub mod memory;
pub mod redis_store;
mod traits;

pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use traits::{SessionStore, storage_key, validate_ttl};

pub struct StorageFactory;

impl StorageFactory {
    pub async fn create(config: &StorageConfig) -> Result<Arc<dyn SessionStore>> {
        let store: Arc<dyn SessionStore> = match config.storage_type.as_str() {
            "memory" => Arc::new(MemorySessionStore::new(config.memory.max_capacity)),
            "redis" => {
                if config.redis.url.trim().is_empty() {
                    return Err(CalibanError::configuration(
                        "storage.type is 'redis' but storage.redis.url is empty",
                    ));
                }
                Arc::new(
                    RedisSessionStore::connect(&config.redis.url, &config.redis.key_prefix)
                        .await?,
                )
            }
            other => {
                return Err(CalibanError::configuration(format!(
                    "Unknown storage type '{}'. Valid: memory, redis",
                    other
                )));
            }
        };

        info!("Session storage initialized: {}", store.backend_name());
        Ok(store)
    }
}
