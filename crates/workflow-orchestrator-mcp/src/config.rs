//! Configuration for the Workflow Orchestrator MCP server.
//!
//! Built once at startup and shared as `Arc<Config>`; nothing reads the
//! environment after [`Config::from_env`] returns.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// OAuth configuration constants.
pub mod oauth {
    use std::time::Duration;

    /// Default access token lifetime (1 hour).
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

    /// Default refresh token lifetime (7 days).
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// Default authorization code lifetime (10 minutes).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(10 * 60);

    /// Lifetime of the `demo_session` login cookie.
    pub const LOGIN_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

    /// Scopes advertised in metadata and granted by default.
    pub const SCOPES_SUPPORTED: &[&str] = &["tasks.read", "tasks.write", "offline_access"];

    /// Scope granted when `/authorize` omits one.
    pub const DEFAULT_SCOPE: &str = "tasks.read tasks.write offline_access";

    /// Prefix of dynamically registered client identifiers.
    pub const CLIENT_ID_PREFIX: &str = "client_";

    /// External subject used when authorization is auto-approved.
    pub const DEFAULT_SUBJECT: &str = "chatgpt_user_mock";

    /// Realm announced in `WWW-Authenticate` challenges.
    pub const REALM: &str = "MCP";
}

/// Server configuration constants.
pub mod server {
    use std::time::Duration;

    /// Public base URL used when none is configured.
    pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

    /// Default SQLite database location.
    pub const DEFAULT_DATABASE_URL: &str = "sqlite://workflow_orchestrator.db";

    /// Path prefixes guarded by the bearer gate by default.
    pub const DEFAULT_PROTECTED_PATHS: &[&str] = &["/mcp"];

    /// Origins allowed to call the server by default.
    pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["https://chat.openai.com", "https://chatgpt.com"];

    /// Uniform request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

/// JWT signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JwtAlgorithm {
    #[default]
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
}

impl JwtAlgorithm {
    /// Whether the algorithm uses an asymmetric key pair.
    #[must_use]
    pub const fn is_asymmetric(self) -> bool {
        matches!(self, Self::Rs256 | Self::Rs384 | Self::Rs512)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
        }
    }
}

impl FromStr for JwtAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::Hs256),
            "HS384" => Ok(Self::Hs384),
            "HS512" => Ok(Self::Hs512),
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            other => anyhow::bail!("unsupported JWT algorithm: {other}"),
        }
    }
}

impl fmt::Display for JwtAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for the optional interactive login step.
#[derive(Clone)]
pub struct DemoLogin {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DemoLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoLogin").field("username", &self.username).finish()
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// Externally visible base URL, also the token audience.
    pub public_base_url: String,

    /// Token issuer; falls back to `public_base_url`.
    pub oauth_issuer: Option<String>,

    /// Protected resource identifier (RFC 8707); falls back to `<base>/mcp`.
    pub oauth_resource: Option<String>,

    /// Shared secret for HMAC signing, and the fallback when RSA keys are unreadable.
    pub jwt_secret: String,

    /// Configured signing algorithm.
    pub jwt_algorithm: JwtAlgorithm,

    /// PEM private key path (RSA algorithms).
    pub jwt_private_key_path: Option<String>,

    /// PEM public key path (RSA algorithms).
    pub jwt_public_key_path: Option<String>,

    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub auth_code_ttl: Duration,

    /// SQLite connection URL.
    pub database_url: String,

    /// Path prefixes that require a bearer token.
    pub protected_paths: Vec<String>,

    /// CORS allow-list.
    pub allowed_origins: Vec<String>,

    /// Interactive login; `None` means auto-approval.
    pub demo_login: Option<DemoLogin>,

    /// External subject provisioned for auto-approved authorizations.
    pub default_subject: String,
}

impl Config {
    /// Create a configuration with defaults around the given base URL and secret.
    #[must_use]
    pub fn new(public_base_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            public_base_url: trim_base_url(public_base_url.into()),
            oauth_issuer: None,
            oauth_resource: None,
            jwt_secret: jwt_secret.into(),
            jwt_algorithm: JwtAlgorithm::default(),
            jwt_private_key_path: None,
            jwt_public_key_path: None,
            access_token_ttl: oauth::ACCESS_TOKEN_TTL,
            refresh_token_ttl: oauth::REFRESH_TOKEN_TTL,
            auth_code_ttl: oauth::AUTH_CODE_TTL,
            database_url: server::DEFAULT_DATABASE_URL.to_string(),
            protected_paths: server::DEFAULT_PROTECTED_PATHS.iter().map(|p| (*p).to_string()).collect(),
            allowed_origins: server::DEFAULT_ALLOWED_ORIGINS.iter().map(|o| (*o).to_string()).collect(),
            demo_login: None,
            default_subject: oauth::DEFAULT_SUBJECT.to_string(),
        }
    }

    /// Create a test configuration backed by an in-memory database.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            ..Self::new(base_url, "test-signing-secret-0123456789abcdef")
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Loads a `.env` file first if one exists.
    ///
    /// # Errors
    ///
    /// Returns error if `JWT_SECRET` is missing or a value fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = env_opt("PUBLIC_BASE_URL").unwrap_or_else(|| server::DEFAULT_BASE_URL.to_string());
        let jwt_secret = env_opt("JWT_SECRET").context("JWT_SECRET must be set")?;

        let mut config = Self::new(base_url, jwt_secret);
        config.oauth_issuer = env_opt("OAUTH_ISSUER");
        config.oauth_resource = env_opt("OAUTH_RESOURCE");
        if let Some(alg) = env_opt("JWT_ALGORITHM") {
            config.jwt_algorithm = alg.parse()?;
        }
        config.jwt_private_key_path = env_opt("JWT_PRIVATE_KEY_PATH");
        config.jwt_public_key_path = env_opt("JWT_PUBLIC_KEY_PATH");

        if let Some(minutes) = env_parse::<u64>("ACCESS_TOKEN_EXPIRE_MINUTES")? {
            config.access_token_ttl = Duration::from_secs(minutes * 60);
        }
        if let Some(days) = env_parse::<u64>("REFRESH_TOKEN_EXPIRE_DAYS")? {
            config.refresh_token_ttl = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(minutes) = env_parse::<u64>("AUTHORIZATION_CODE_EXPIRE_MINUTES")? {
            config.auth_code_ttl = Duration::from_secs(minutes * 60);
        }

        if let Some(url) = env_opt("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(paths) = env_opt("PROTECTED_PATHS") {
            config.protected_paths = split_list(&paths);
        }
        if let Some(origins) = env_opt("ALLOWED_ORIGINS") {
            config.allowed_origins = split_list(&origins);
        }
        if let (Some(username), Some(password)) =
            (env_opt("DEMO_LOGIN_USERNAME"), env_opt("DEMO_LOGIN_PASSWORD"))
        {
            config.demo_login = Some(DemoLogin { username, password });
        }
        if let Some(subject) = env_opt("DEFAULT_SUBJECT") {
            config.default_subject = subject;
        }

        Ok(config)
    }

    /// Token issuer (`iss` claim and metadata `issuer`).
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.oauth_issuer.as_deref().unwrap_or(&self.public_base_url)
    }

    /// Token audience (`aud` claim).
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.public_base_url
    }

    /// Protected resource identifier.
    #[must_use]
    pub fn resource(&self) -> String {
        self.oauth_resource
            .clone()
            .unwrap_or_else(|| format!("{}/mcp", self.public_base_url))
    }

    /// Absolute URL of an endpoint under the public base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url, path)
    }

    /// URL of the RFC 9728 protected-resource metadata document.
    #[must_use]
    pub fn resource_metadata_url(&self) -> String {
        self.endpoint("/.well-known/oauth-protected-resource")
    }

    /// Whether `/authorize` requires the interactive login step.
    #[must_use]
    pub const fn login_enabled(&self) -> bool {
        self.demo_login.is_some()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("public_base_url", &self.public_base_url)
            .field("issuer", &self.issuer())
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("auth_code_ttl", &self.auth_code_ttl)
            .field("database_url", &self.database_url)
            .field("protected_paths", &self.protected_paths)
            .field("demo_login", &self.demo_login)
            .finish()
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_opt(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid value for {key}: {raw}")))
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
