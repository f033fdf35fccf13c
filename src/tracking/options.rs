use serde_json::{Map, Value};

use crate::errors::{CalibanError, Result};

/// 调用方针对单次请求给出的参数
///
/// 列表参数会与配置中的同名列表合并，而不是替换。
#[derive(Debug, Clone, Default)]
pub struct TrackingOptions {
    /// 调用方（例如浏览器端脚本）已生成的会话 ID
    pub session_id: Option<String>,
    /// 需要关联到新会话的旧会话 ID
    pub linked_session_ids: Vec<String>,
    pub new_session: bool,
    /// 覆盖配置中的会话过期秒数，0 表示永不过期
    pub cache_expiration: Option<u64>,
    pub append_params: Vec<String>,
    pub ignore_params: Vec<String>,
    pub first_attribution_params: Vec<String>,
    pub campaign_start_params: Vec<String>,
    pub property_id: Option<String>,
    pub user_id: Option<String>,
    /// 落地请求时写入的附加字段
    pub custom_data: Map<String, Value>,
}

impl TrackingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn link_session(mut self, id: impl Into<String>) -> Self {
        self.linked_session_ids.push(id.into());
        self
    }

    pub fn new_session(mut self, is_new: bool) -> Self {
        self.new_session = is_new;
        self
    }

    pub fn cache_expiration(mut self, seconds: u64) -> Self {
        self.cache_expiration = Some(seconds);
        self
    }

    pub fn ignore<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_params.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn first_attribution<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.first_attribution_params
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn campaign_start<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.campaign_start_params
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom_data.insert(key.into(), value.into());
        self
    }

    /// 解析调用方传入的自定义数据，必须是 JSON 对象
    pub fn parse_custom_data(raw: &str) -> Result<Map<String, Value>> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CalibanError::malformed_input(
                "custom data must be a JSON object",
            )),
            Err(e) => Err(CalibanError::malformed_input(format!(
                "custom data is not valid JSON: {}",
                e
            ))),
        }
    }

    /// 解析过期时间覆盖值
    pub fn parse_cache_expiration(raw: &str) -> Result<u64> {
        raw.trim().parse::<u64>().map_err(|_| {
            CalibanError::validation(format!(
                "cache expiration must be a non-negative integer number of seconds, got '{}'",
                raw
            ))
        })
    }
}
