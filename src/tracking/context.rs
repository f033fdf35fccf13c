use std::collections::HashMap;

use crate::utils::QueryParams;

/// 单次请求的不可变输入
///
/// query 从 `url` 中解析，构建后不再修改。
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    url: String,
    referrer: String,
    client_ip: Option<String>,
    user_agent: Option<String>,
    cookies: HashMap<String, String>,
    query: QueryParams,
}

impl RequestContext {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let query = QueryParams::from_url(&url);
        Self {
            url,
            query,
            ..Self::default()
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    pub fn with_client_ip(mut self, ip: Option<String>) -> Self {
        self.client_ip = ip.filter(|s| !s.is_empty());
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent.filter(|s| !s.is_empty());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_cookies<I, K, V>(mut self, cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.cookies
            .extend(cookies.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn cookie_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cookies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key)
    }

    pub fn cookie_value(&self, key: &str) -> Option<&str> {
        self.cookies
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// 取值顺序：URL query → cookie
    pub fn client_value(&self, key: &str) -> Option<&str> {
        self.query_value(key).or_else(|| self.cookie_value(key))
    }

    /// 取值顺序：URL query → cookie → 调用方给出的缺省值
    pub fn client_value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.client_value(key).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsed_from_url() {
        let ctx = RequestContext::new("https://shop.example/p?utm_source=google&x=1");
        assert_eq!(ctx.query_value("utm_source"), Some("google"));
        assert_eq!(ctx.query().len(), 2);
    }

    #[test]
    fn test_client_value_precedence() {
        let ctx = RequestContext::new("https://a.example/?src=url")
            .with_cookie("src", "cookie")
            .with_cookie("only_cookie", "c");
        assert_eq!(ctx.client_value("src"), Some("url"));
        assert_eq!(ctx.client_value("only_cookie"), Some("c"));
        assert_eq!(ctx.client_value("missing"), None);
        assert_eq!(ctx.client_value_or("missing", "(none)"), "(none)");
    }

    #[test]
    fn test_empty_values_are_absent() {
        let ctx = RequestContext::new("https://a.example/?src=")
            .with_cookie("src", "")
            .with_client_ip(Some(String::new()));
        assert_eq!(ctx.client_value("src"), None);
        assert_eq!(ctx.client_ip(), None);
    }
}
