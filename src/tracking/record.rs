//! 会话记录容器
//!
//! 记录是一个有序的 `String -> Value` 映射。写入分三种语义：
//! - `set_if_absent`：落地字段，只在缺失时写入
//! - `set_always`：持续字段，每次请求覆盖
//! - `merge_append`：数组字段，新元素前插且不替换同 id 的已有元素
//!
//! 任何写入都不会存储 null 或空字符串。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;

/// 记录中的固定字段名
pub mod keys {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const DURATION: &str = "duration";
    pub const REFERRER: &str = "referrer";
    pub const LANDING_URI: &str = "landing_uri";
    pub const GAUID: &str = "gauid";
    pub const IP: &str = "ip";
    pub const USER_AGENT: &str = "ua";
    pub const LAST_URI: &str = "last_uri";
    pub const USER_ID: &str = "uid";
    pub const LINKED_SESSIONS: &str = "linked_sessions";

    /// 调用方自定义数据不能覆盖的字段
    pub const PROTECTED: [&str; 5] = [ID, CREATED_AT, UPDATED_AT, DURATION, LINKED_SESSIONS];

    /// 由引擎自己维护的字段，同名的页面参数不会写入记录
    pub const ENGINE_OWNED: [&str; 10] = [
        ID,
        CREATED_AT,
        UPDATED_AT,
        DURATION,
        REFERRER,
        LANDING_URI,
        IP,
        USER_AGENT,
        LAST_URI,
        LINKED_SESSIONS,
    ];
}

/// 存储内容无法解析为会话记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    Empty,
    /// 既不是 JSON 也不是十六进制
    Unrecognized,
    /// 十六进制解码后不是 UTF-8 JSON
    InvalidHexPayload,
    /// 合法 JSON，但顶层不是对象
    NotAnObject,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::Empty => write!(f, "empty payload"),
            ParseFailure::Unrecognized => write!(f, "payload is neither JSON nor hex-encoded JSON"),
            ParseFailure::InvalidHexPayload => write!(f, "hex payload does not decode to JSON"),
            ParseFailure::NotAnObject => write!(f, "JSON payload is not an object"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRecord {
    data: Map<String, Value>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析存储中的原始字符串：JSON，或十六进制编码的 JSON
    pub fn parse_stored(raw: &str) -> Result<Self, ParseFailure> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseFailure::Empty);
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => return Ok(Self::from_map(map)),
            Ok(_) => return Err(ParseFailure::NotAnObject),
            Err(_) => {}
        }

        if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseFailure::Unrecognized);
        }

        let bytes = hex::decode(raw).map_err(|_| ParseFailure::InvalidHexPayload)?;
        let text = String::from_utf8(bytes).map_err(|_| ParseFailure::InvalidHexPayload)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(Self::from_map(map)),
            Ok(_) => Err(ParseFailure::NotAnObject),
            Err(_) => Err(ParseFailure::InvalidHexPayload),
        }
    }

    /// 解析失败时返回空记录，从不向调用方抛错
    pub fn from_prior_or_empty(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::new();
        };
        match Self::parse_stored(raw) {
            Ok(record) => record,
            Err(ParseFailure::Empty) => Self::new(),
            Err(e) => {
                warn!("Discarding malformed stored session payload: {}", e);
                Self::new()
            }
        }
    }

    /// 从映射构建，空值被丢弃，数字字符串转为数字
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut record = Self::new();
        for (key, value) in map {
            record.set_always(&key, value);
        }
        record
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !is_blank(v))
    }

    /// 字符串或数字字段的文本形式
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 仅当字段缺失时写入，返回是否写入
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if is_blank(&value) || self.contains(key) {
            return false;
        }
        self.data.insert(key.to_string(), numeric_check(value));
        true
    }

    /// 总是覆盖写入，返回是否写入
    pub fn set_always(&mut self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if is_blank(&value) {
            return false;
        }
        self.data.insert(key.to_string(), numeric_check(value));
        true
    }

    /// 向数组字段前插新元素，已存在（同 `id` 或完全相同）的元素不会被替换
    ///
    /// 字段已存在但不是数组时不做任何修改。
    pub fn merge_append(&mut self, key: &str, items: Vec<Value>) {
        let existing = match self.data.get(key) {
            Some(Value::Array(items)) => items.clone(),
            Some(v) if !is_blank(v) => return,
            _ => Vec::new(),
        };

        let mut merged: Vec<Value> = Vec::with_capacity(items.len() + existing.len());
        for item in items {
            if is_blank(&item) {
                continue;
            }
            let item = numeric_check(item);
            let duplicate = existing
                .iter()
                .chain(merged.iter())
                .any(|other| same_entry(other, &item));
            if !duplicate {
                merged.push(item);
            }
        }
        merged.extend(existing);

        if !merged.is_empty() {
            self.data.insert(key.to_string(), Value::Array(merged));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    /// 去掉嵌套的 linked_sessions，保证关联深度不超过 1
    pub fn without_linked_sessions(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.remove(keys::LINKED_SESSIONS);
        snapshot
    }

    pub fn linked_sessions(&self) -> Vec<SessionRecord> {
        match self.get(keys::LINKED_SESSIONS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .map(Self::from_map)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.get_string(keys::ID)
    }

    pub fn created_at(&self) -> Option<i64> {
        self.get_i64(keys::CREATED_AT)
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.get_i64(keys::UPDATED_AT)
    }

    pub fn duration(&self) -> Option<i64> {
        self.get_i64(keys::DURATION)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// 规范 JSON 输出，同时是存储格式和对外输出格式
    pub fn to_json(&self) -> String {
        // Map<String, Value> 的序列化不会失败
        serde_json::to_string(&self.data).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<SessionRecord> for Value {
    fn from(record: SessionRecord) -> Self {
        Value::Object(record.data)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn same_entry(a: &Value, b: &Value) -> bool {
    match (a.get(keys::ID), b.get(keys::ID)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// 将看起来像数字的字符串转换为数字（递归）
///
/// 只转换能无损还原的写法：`42`、`-7`、`1.5`；`007`、`1.50`、`1e3` 保持字符串。
pub fn numeric_check(value: Value) -> Value {
    match value {
        Value::String(s) => numeric_from_str(&s).unwrap_or(Value::String(s)),
        Value::Array(items) => Value::Array(items.into_iter().map(numeric_check).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, numeric_check(v)))
                .collect(),
        ),
        other => other,
    }
}

fn numeric_from_str(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return (i.to_string() == s).then(|| Value::from(i));
    }
    if s.contains('.')
        && let Ok(f) = s.parse::<f64>()
        && f.is_finite()
        && f.to_string() == s
    {
        return Number::from_f64(f).map(Value::Number);
    }
    None
}
