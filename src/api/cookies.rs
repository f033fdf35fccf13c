use actix_web::cookie::{Cookie, SameSite, time::Duration};

use crate::config::{CookieConfig, SameSitePolicy};
use crate::tracking::SessionCookie;

/// 永不过期的会话使用浏览器允许的最长 Cookie 寿命
pub const NON_EXPIRING_MAX_AGE_DAYS: i64 = 400;

/// 会话 Cookie 构建器
///
/// Cookie 需要被浏览器端脚本读取，因此不设置 HttpOnly。
#[derive(Debug, Clone)]
pub struct SessionCookieBuilder {
    same_site: SameSite,
    secure: bool,
    domain: Option<String>,
}

impl SessionCookieBuilder {
    pub fn from_config(config: &CookieConfig) -> Self {
        let same_site = match config.same_site {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::None => SameSite::None,
            SameSitePolicy::Lax => SameSite::Lax,
        };

        Self {
            same_site,
            // 跨站 Cookie 必须带 Secure，否则浏览器直接丢弃
            secure: config.secure || same_site == SameSite::None,
            domain: config.domain.clone().filter(|d| !d.trim().is_empty()),
        }
    }

    pub fn build(&self, session: &SessionCookie) -> Cookie<'static> {
        let max_age = match session.max_age {
            Some(seconds) => Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX)),
            None => Duration::days(NON_EXPIRING_MAX_AGE_DAYS),
        };

        let mut cookie = Cookie::new(session.name.clone(), session.value.clone());
        cookie.set_path("/");
        cookie.set_http_only(false);
        cookie.set_secure(self.secure);
        cookie.set_same_site(self.same_site);
        cookie.set_max_age(max_age);
        if let Some(ref domain) = self.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }
}

impl Default for SessionCookieBuilder {
    fn default() -> Self {
        Self::from_config(&CookieConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(max_age: Option<u64>) -> SessionCookie {
        SessionCookie {
            name: "_cbnsid".to_string(),
            value: "abc".to_string(),
            max_age,
        }
    }

    #[test]
    fn test_default_cookie_attributes() {
        let cookie = SessionCookieBuilder::default().build(&session(Some(7200)));
        assert_eq!(cookie.name(), "_cbnsid");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(7200)));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(false));
    }

    #[test]
    fn test_same_site_none_forces_secure() {
        let config = CookieConfig {
            secure: false,
            same_site: SameSitePolicy::None,
            domain: Some("example.com".to_string()),
        };
        let cookie = SessionCookieBuilder::from_config(&config).build(&session(None));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(
            cookie.max_age(),
            Some(Duration::days(NON_EXPIRING_MAX_AGE_DAYS))
        );
    }
}
