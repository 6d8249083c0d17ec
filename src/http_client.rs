use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;

use crate::config::Config;
use crate::error::ApiError;
use crate::session::{current_access_token, SessionContext};

/// Credentials a provider API client is built from
#[derive(Clone)]
pub struct ClientCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

/// HTTP client for provider APIs, authorized with one session's access token.
///
/// Built per request; there is no shared client instance.
pub struct ProviderClient {
    client: Client,
}

impl ProviderClient {
    /// Create a client whose requests carry the bearer token by default
    pub fn new(credentials: ClientCredentials, request_timeout: u64) -> Result<Self> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.access_token))
            .context("Access token is not a valid header value")?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create provider HTTP client")?;

        Ok(Self { client })
    }

    /// Build a client for the current session, or `Unauthorized`
    pub fn from_session(
        config: &Config,
        session: Option<&SessionContext>,
    ) -> Result<Self, ApiError> {
        let access_token = current_access_token(session)?;

        let credentials = ClientCredentials {
            access_token,
            refresh_token: None,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_callback_url.clone(),
        };

        Ok(Self::new(credentials, config.http_request_timeout)?)
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }
}
