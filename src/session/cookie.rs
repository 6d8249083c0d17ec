// Session cookie transport

use axum::http::{header, HeaderMap, HeaderValue};

const COOKIE_NAME: &str = "session-token";
const SECURE_COOKIE_NAME: &str = "__Secure-session-token";

/// Browsers drop cookies larger than this
const MAX_COOKIE_SIZE: usize = 4096;

/// Cookie attributes, fixed at startup
#[derive(Debug, Clone)]
pub struct CookieSettings {
    secure: bool,
    max_age: i64,
}

impl CookieSettings {
    pub fn new(secure: bool, max_age: i64) -> Self {
        Self { secure, max_age }
    }

    pub fn name(&self) -> &'static str {
        if self.secure {
            SECURE_COOKIE_NAME
        } else {
            COOKIE_NAME
        }
    }

    /// Read the session artifact from the request's Cookie headers
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        let prefix = format!("{}=", self.name());
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .map(str::trim)
            .find_map(|pair| pair.strip_prefix(prefix.as_str()))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Set-Cookie value carrying a (re-)issued artifact
    pub fn issue(&self, artifact: &str) -> Option<HeaderValue> {
        let cookie = self.render(artifact, self.max_age);
        if cookie.len() > MAX_COOKIE_SIZE {
            tracing::warn!(
                size = cookie.len(),
                "Session cookie exceeds {} bytes and may be dropped by the browser",
                MAX_COOKIE_SIZE
            );
        }
        HeaderValue::from_str(&cookie).ok()
    }

    /// Set-Cookie value that removes the session cookie
    pub fn clear(&self) -> HeaderValue {
        HeaderValue::from_str(&self.render("", 0))
            .unwrap_or_else(|_| HeaderValue::from_static("session-token=; Path=/; Max-Age=0"))
    }

    fn render(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name(),
            value,
            max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}
