use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub backend_anon_key: String,
    pub local_state_path: String,
    pub port: u16,
    pub rust_log: String,
    /// Window in which an unforced reload of the story lists is skipped.
    pub posts_cache: Option<Duration>,
    pub reading_history_cache: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let posts_cache_secs: u64 = optional_env("POSTS_CACHE_SECS", 0)?;

        Ok(Config {
            backend_url: require_env("BACKEND_URL")?,
            backend_anon_key: require_env("BACKEND_ANON_KEY")?,
            local_state_path: std::env::var("LOCAL_STATE_PATH")
                .unwrap_or_else(|_| "storyline-state.json".to_string()),
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            posts_cache: (posts_cache_secs > 0).then(|| Duration::from_secs(posts_cache_secs)),
            reading_history_cache: Duration::from_secs(optional_env(
                "READING_HISTORY_CACHE_SECS",
                60,
            )?),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
