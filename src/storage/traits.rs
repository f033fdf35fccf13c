use async_trait::async_trait;

use crate::errors::{CalibanError, Result};

/// 会话存储后端
///
/// 按 `(id, context)` 复合键读写序列化后的会话记录。
/// 后端不保证跨请求的原子性，同一会话的并发写入以最后一次为准。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取原始存储内容，不存在时返回 `Ok(None)`
    async fn load(&self, id: &str, context: &str) -> Result<Option<String>>;

    /// 写入原始内容，`ttl_secs` 为 `None` 时永不过期
    async fn save(&self, id: &str, context: &str, value: &str, ttl_secs: Option<u64>)
    -> Result<bool>;

    /// 后端连通性检查
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// 复合存储键：`{context}.{id}`
pub fn storage_key(context: &str, id: &str) -> String {
    format!("{}.{}", context, id)
}

/// TTL 必须为正数；永不过期用 `None` 表示
pub fn validate_ttl(ttl_secs: Option<u64>) -> Result<()> {
    match ttl_secs {
        Some(0) => Err(CalibanError::validation(
            "ttl must be a positive number of seconds, use no ttl for non-expiring sessions",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        assert_eq!(storage_key("cbn", "abc"), "cbn.abc");
        assert_eq!(storage_key("__debug__cbn", "abc"), "__debug__cbn.abc");
    }

    #[test]
    fn test_validate_ttl() {
        assert!(validate_ttl(None).is_ok());
        assert!(validate_ttl(Some(60)).is_ok());
        assert!(matches!(
            validate_ttl(Some(0)),
            Err(CalibanError::Validation(_))
        ));
    }
}
