//! 请求参数分类
//!
//! 每个请求的 query 参数被划分为：
//! - reserved：身份、UTM 参数以及记录自身的字段名，永远有专门处理，不能被配置改变
//! - first attribution：只在落地请求写入
//! - ignore：不写入会话
//! - remainder：其余参数，即每次请求都覆盖的 last attribution 参数
//!
//! campaign start 参数只用于判断是否开启新会话。

use std::collections::HashSet;

use crate::tracking::record::keys;
use crate::utils::QueryParams;

/// 匿名用户 ID 参数
pub const GAUID_PARAM: &str = "gauid";

/// UTM 参数及其缺省值（与 Google Analytics 的约定一致）
pub const UTM_DEFAULTS: [(&str, &str); 5] = [
    ("utm_source", "(direct)"),
    ("utm_medium", "(none)"),
    ("utm_campaign", "(not set)"),
    ("utm_content", "(not set)"),
    ("utm_term", "(not set)"),
];

/// 固定保留参数，任何配置都无法重新归类
pub const RESERVED_PARAMS: [&str; 6] = [
    GAUID_PARAM,
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
];

/// 关联会话参数名：`link_<session_key>`
pub fn link_param_name(session_key: &str) -> String {
    format!("link_{}", session_key)
}

#[derive(Debug, Clone, Default)]
pub struct ParamClassifier {
    reserved: HashSet<String>,
    first_attribution: Vec<String>,
    ignore: Vec<String>,
    campaign_start: Vec<String>,
}

impl ParamClassifier {
    /// 会话参数本身（及其关联参数）也作为保留参数，避免被当作归因数据写入
    pub fn new(session_key: &str) -> Self {
        let mut reserved: HashSet<String> = RESERVED_PARAMS
            .iter()
            .chain(keys::ENGINE_OWNED.iter())
            .map(|s| s.to_string())
            .collect();
        if !session_key.is_empty() {
            reserved.insert(session_key.to_string());
            reserved.insert(link_param_name(session_key));
        }
        Self {
            reserved,
            ..Self::default()
        }
    }

    pub fn with_first_attribution<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        extend_unique(&mut self.first_attribution, keys);
        self
    }

    pub fn with_ignore<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        extend_unique(&mut self.ignore, keys);
        self
    }

    pub fn with_campaign_start<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        extend_unique(&mut self.campaign_start, keys);
        self
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        self.reserved.contains(key)
    }

    pub fn is_ignored(&self, key: &str) -> bool {
        self.ignore.iter().any(|k| k == key)
    }

    pub fn is_first_attribution(&self, key: &str) -> bool {
        self.first_attribution.iter().any(|k| k == key)
    }

    pub fn first_attribution_params(&self) -> &[String] {
        &self.first_attribution
    }

    pub fn ignore_params(&self) -> &[String] {
        &self.ignore
    }

    pub fn campaign_start_params(&self) -> &[String] {
        &self.campaign_start
    }

    /// remainder = 请求参数 − (reserved ∪ first attribution ∪ ignore)
    ///
    /// 保持请求中的出现顺序，便于调试。
    pub fn remainder<'a>(&self, query: &'a QueryParams) -> Vec<&'a str> {
        query
            .keys()
            .filter(|key| {
                !self.is_reserved(key) && !self.is_first_attribution(key) && !self.is_ignored(key)
            })
            .collect()
    }

    /// 请求中是否带有任一 campaign start 参数（且值非空）
    pub fn is_campaign_start(&self, query: &QueryParams) -> bool {
        self.campaign_start_match(query).is_some()
    }

    /// 第一个命中的 campaign start 参数
    pub fn campaign_start_match(&self, query: &QueryParams) -> Option<&str> {
        self.campaign_start
            .iter()
            .find(|key| query.get(key).is_some())
            .map(String::as_str)
    }
}

fn extend_unique<I, S>(target: &mut Vec<String>, keys: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for key in keys {
        let key = key.as_ref().trim();
        if !key.is_empty() && !target.iter().any(|k| k == key) {
            target.push(key.to_string());
        }
    }
}
