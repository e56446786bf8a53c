//! Server configuration from environment variables, with code defaults.
//!
//! Token lifetime specs are validated here so a malformed duration is fatal at
//! startup instead of surfacing on the first login.

use anyhow::{Context, Result};
use tracing::warn;

use crate::identity::token::parse_duration_spec;

const DEV_ACCESS_SECRET: &str = "brigade-dev-access-secret";
const DEV_REFRESH_SECRET: &str = "brigade-dev-refresh-secret";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub data_root: String,
    pub access_secret: String,
    pub refresh_secret: String,
    /// Duration spec, e.g. "15m".
    pub access_ttl: String,
    /// Duration spec, e.g. "7d".
    pub refresh_ttl: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let http_port = env_or("BRIGADE_HTTP_PORT", "8090")
            .parse::<u16>()
            .context("BRIGADE_HTTP_PORT must be a port number")?;
        let data_root = env_or("BRIGADE_DATA_FOLDER", "data");
        let access_secret = env_or("BRIGADE_ACCESS_SECRET", DEV_ACCESS_SECRET);
        let refresh_secret = env_or("BRIGADE_REFRESH_SECRET", DEV_REFRESH_SECRET);
        if access_secret == DEV_ACCESS_SECRET || refresh_secret == DEV_REFRESH_SECRET {
            warn!("using built-in development token secrets; set BRIGADE_ACCESS_SECRET and BRIGADE_REFRESH_SECRET");
        }
        let access_ttl = env_or("BRIGADE_ACCESS_TTL", "15m");
        let refresh_ttl = env_or("BRIGADE_REFRESH_TTL", "7d");
        parse_duration_spec(&access_ttl)
            .with_context(|| format!("BRIGADE_ACCESS_TTL: bad duration spec '{access_ttl}'"))?;
        parse_duration_spec(&refresh_ttl)
            .with_context(|| format!("BRIGADE_REFRESH_TTL: bad duration spec '{refresh_ttl}'"))?;
        Ok(Self { http_port, data_root, access_secret, refresh_secret, access_ttl, refresh_ttl })
    }
}
