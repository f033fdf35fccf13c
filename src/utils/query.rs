//! Query string 解析
//!
//! 保留参数的首次出现顺序，重复参数以最后一次的值为准。

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// 有序的 query 参数集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: IndexMap<String, String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 `a=1&b=2` 形式的字符串（不含 `?`）
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key.is_empty() {
                continue;
            }
            params.insert(key.into_owned(), value.into_owned());
        }
        params
    }

    /// 从完整 URL 或相对路径中提取并解析 query
    pub fn from_url(url: &str) -> Self {
        query_of_url(url).map(Self::parse).unwrap_or_default()
    }

    /// 已有键保留原位置，只替换值
    pub fn insert(&mut self, key: String, value: String) {
        self.pairs.insert(key, value);
    }

    /// 获取原始值（可能为空字符串）
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    /// 获取非空值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_raw(key).filter(|v| !v.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 合并另一组参数，已有键被覆盖
    pub fn extend(&mut self, other: QueryParams) {
        for (key, value) in other.pairs {
            self.insert(key, value);
        }
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        self.pairs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

impl FromIterator<(String, String)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// 截取 URL 中 `?` 与 `#` 之间的部分
pub fn query_of_url(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once('?')?;
    let query = rest.split('#').next().unwrap_or_default();
    if query.is_empty() { None } else { Some(query) }
}

/// 拆分逗号分隔的参数名列表，去除空白与空项
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
