use anyhow::{Context, Result};
use clap::Parser;

/// Minimum length of the encryption secret in bytes
const MIN_SECRET_LEN: usize = 16;

/// Sealed Session - stateless OAuth2 session service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "3000")]
    pub port: u16,

    /// OAuth2 client ID registered with the provider
    #[arg(long, env = "OAUTH_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// OAuth2 client secret
    #[arg(long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Provider token endpoint base URL (the refresh grant goes to <base>/token)
    #[arg(long, env = "OAUTH_TOKEN_ENDPOINT")]
    pub token_endpoint: Option<String>,

    /// Secret used to encrypt tokens and sign session cookies
    #[arg(long, env = "SESSION_ENCRYPTION_SECRET", hide_env_values = true)]
    pub encryption_secret: Option<String>,

    /// OAuth2 redirect callback URL
    #[arg(long, env = "OAUTH_REDIRECT_URL")]
    pub redirect_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Token refresh HTTP timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Session max age in seconds
    #[arg(long, env = "SESSION_MAX_AGE", default_value = "2592000")]
    pub session_max_age: u64,
}

#[derive(Clone)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // OAuth2 client
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint_base_url: String,
    pub redirect_callback_url: String,

    // Session
    pub encryption_secret: String,
    pub session_max_age: u64,

    // HTTP client
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_endpoint_base_url", &self.token_endpoint_base_url)
            .field("redirect_callback_url", &self.redirect_callback_url)
            .field("encryption_secret", &"<redacted>")
            .field("session_max_age", &self.session_max_age)
            .field("http_request_timeout", &self.http_request_timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Build configuration from parsed arguments; every OAuth2 setting is required
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            server_host: args.host,
            server_port: args.port,

            client_id: required(
                args.client_id,
                "OAUTH_CLIENT_ID is required (use --client-id or set OAUTH_CLIENT_ID env var)",
            )?,

            client_secret: required(
                args.client_secret,
                "OAUTH_CLIENT_SECRET is required (use --client-secret or set OAUTH_CLIENT_SECRET env var)",
            )?,

            token_endpoint_base_url: required(
                args.token_endpoint,
                "OAUTH_TOKEN_ENDPOINT is required (use --token-endpoint or set OAUTH_TOKEN_ENDPOINT env var)",
            )?,

            redirect_callback_url: required(
                args.redirect_url,
                "OAUTH_REDIRECT_URL is required (use --redirect-url or set OAUTH_REDIRECT_URL env var)",
            )?,

            encryption_secret: required(
                args.encryption_secret,
                "SESSION_ENCRYPTION_SECRET is required (use --encryption-secret or set SESSION_ENCRYPTION_SECRET env var)",
            )?,

            session_max_age: args.session_max_age,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.token_endpoint_base_url) {
            anyhow::bail!(
                "OAUTH_TOKEN_ENDPOINT must be an http(s) URL: {}",
                self.token_endpoint_base_url
            );
        }

        if !is_http_url(&self.redirect_callback_url) {
            anyhow::bail!(
                "OAUTH_REDIRECT_URL must be an http(s) URL: {}",
                self.redirect_callback_url
            );
        }

        if self.encryption_secret.len() < MIN_SECRET_LEN {
            anyhow::bail!(
                "SESSION_ENCRYPTION_SECRET must be at least {} bytes long",
                MIN_SECRET_LEN
            );
        }

        if self.session_max_age == 0 {
            anyhow::bail!("SESSION_MAX_AGE must be greater than zero");
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// Cookies are marked Secure when the callback is served over https
    pub fn secure_cookies(&self) -> bool {
        self.redirect_callback_url.starts_with("https://")
    }
}

/// Treat empty and whitespace-only values as missing
fn required(value: Option<String>, message: &'static str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .context(message)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}
