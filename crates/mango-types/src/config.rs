use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub jwt_secret: String,
    pub jwt_lifetime_secs: i64,
    /// Enables the destructive `/drop_all` endpoint.
    pub dev_endpoints: bool,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub engine: String,
    pub max_tokens: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup, so tests do not have to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("MANGO_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MANGO_JWT_SECRET is unset or still a placeholder");
        }

        let port = get("MANGO_PORT", "8000")
            .parse()
            .context("MANGO_PORT must be a port number")?;
        let max_upload_bytes = get("MANGO_MAX_UPLOAD_BYTES", "10485760")
            .parse()
            .context("MANGO_MAX_UPLOAD_BYTES must be a byte count")?;
        let jwt_lifetime_secs = get("MANGO_JWT_LIFETIME_SECS", "3600")
            .parse()
            .context("MANGO_JWT_LIFETIME_SECS must be a number of seconds")?;
        let max_tokens = get("OPENAI_MAX_TOKENS", "256")
            .parse()
            .context("OPENAI_MAX_TOKENS must be a number")?;

        Ok(Self {
            host: get("MANGO_HOST", "0.0.0.0"),
            port,
            db_path: get("MANGO_DB_PATH", "mango.db").into(),
            upload_dir: get("MANGO_UPLOAD_DIR", "./uploads").into(),
            max_upload_bytes,
            jwt_secret,
            jwt_lifetime_secs,
            dev_endpoints: matches!(
                get("MANGO_DEV_ENDPOINTS", "false").to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            openai: OpenAiConfig {
                api_key: lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()),
                api_base: get("OPENAI_API_BASE", "https://api.openai.com/v1"),
                engine: get("OPENAI_ENGINE", "gpt-3.5-turbo-instruct"),
                max_tokens,
            },
        })
    }
}
