use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub feed_capacity: usize,
    pub token_lifetime_days: i64,
    pub secure_cookies: bool,
    pub cors_origin: Option<String>,
    pub word_api_url: Option<String>,
}

impl Config {
    /// Reads the process environment, honouring a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty());

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:poker.db?mode=rwc".to_owned()),
            bind_addr: parse(&var, "BIND_ADDR", "0.0.0.0:8080".parse()?)?,
            max_connections: parse(&var, "MAX_CONNECTIONS", 16)?,
            feed_capacity: parse(&var, "FEED_CAPACITY", 256)?,
            token_lifetime_days: parse(&var, "TOKEN_LIFETIME_DAYS", 3650)?,
            secure_cookies: parse(&var, "SECURE_COOKIES", false)?,
            cors_origin: var("CORS_ORIGIN"),
            word_api_url: var("WORD_API_URL"),
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}
