use tower_cookies::Cookie;
use tower_cookies::cookie::SameSite;
use tower_cookies::cookie::time::Duration;

use crate::config::Config;
use crate::models::auth::AuthCookies;

/// Name of the access token cookie.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
/// Name of the refresh token cookie.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
/// Path both cookies are scoped to.
pub const COOKIE_PATH: &str = "/";

/// Attributes shared by every auth cookie.
#[derive(Clone, Copy, Debug)]
pub struct CookiePolicy {
    /// Whether cookies carry the `Secure` attribute.
    pub secure: bool,
    /// The `SameSite` attribute.
    pub same_site: SameSite,
}

impl CookiePolicy {
    pub fn new(secure: bool, same_site: SameSite) -> Self {
        Self { secure, same_site }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.token_secure, config.token_same_site)
    }

    /// Creates an HttpOnly token cookie living for `max_age_secs`.
    pub fn token_cookie(&self, name: &'static str, value: String, max_age_secs: i64) -> Cookie<'static> {
        let mut cookie = Cookie::new(name, value);
        cookie.set_http_only(true);
        cookie.set_secure(self.secure);
        cookie.set_same_site(self.same_site);
        cookie.set_path(COOKIE_PATH);
        cookie.set_max_age(Duration::seconds(max_age_secs));
        cookie
    }

    /// Creates a cookie that deletes `name` on the client.
    pub fn cleared_cookie(&self, name: &'static str) -> Cookie<'static> {
        self.token_cookie(name, String::new(), 0)
    }

    /// Both token cookies.
    pub fn token_cookies(
        &self,
        access_token: String,
        access_max_age_secs: i64,
        refresh_token: String,
        refresh_max_age_secs: i64,
    ) -> AuthCookies {
        AuthCookies {
            access: self.token_cookie(ACCESS_TOKEN_COOKIE, access_token, access_max_age_secs),
            refresh: self.token_cookie(REFRESH_TOKEN_COOKIE, refresh_token, refresh_max_age_secs),
        }
    }

    /// Both token cookies, cleared.
    pub fn cleared_cookies(&self) -> AuthCookies {
        AuthCookies {
            access: self.cleared_cookie(ACCESS_TOKEN_COOKIE),
            refresh: self.cleared_cookie(REFRESH_TOKEN_COOKIE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_cookie_has_the_wire_attributes() {
        let policy = CookiePolicy::new(true, SameSite::Strict);
        let rendered = policy
            .token_cookie(ACCESS_TOKEN_COOKIE, "abc".into(), 900)
            .to_string();
        assert!(rendered.starts_with("access_token=abc"));
        for attribute in ["HttpOnly", "Secure", "SameSite=Strict", "Path=/", "Max-Age=900"] {
            assert!(rendered.contains(attribute), "{} missing in {}", attribute, rendered);
        }
    }

    #[test]
    fn insecure_policy_omits_secure() {
        let policy = CookiePolicy::new(false, SameSite::Lax);
        let rendered = policy
            .token_cookie(REFRESH_TOKEN_COOKIE, "r".into(), 604800)
            .to_string();
        assert!(!rendered.contains("Secure"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Max-Age=604800"));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let cleared = CookiePolicy::new(true, SameSite::Lax).cleared_cookies();
        assert_eq!(cleared.access.value(), "");
        assert_eq!(cleared.refresh.name(), REFRESH_TOKEN_COOKIE);
        assert!(cleared.refresh.to_string().contains("Max-Age=0"));
        assert!(cleared.access.http_only().unwrap_or(false));
    }
}
