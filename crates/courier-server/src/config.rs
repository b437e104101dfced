use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use courier_gateway::media::DEFAULT_MAX_MEDIA_BYTES;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub media_dir: PathBuf,
    pub public_url: String,
    pub max_media_bytes: usize,
}

impl ServerConfig {
    /// Read `COURIER_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder");
        }

        let host = get("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("COURIER_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("COURIER_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let max_media_bytes = match get("COURIER_MAX_MEDIA_BYTES") {
            Some(v) => v
                .parse()
                .context("COURIER_MAX_MEDIA_BYTES must be a byte count")?,
            None => DEFAULT_MAX_MEDIA_BYTES,
        };

        Ok(Self {
            jwt_secret,
            db_path: get("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            addr,
            media_dir: get("COURIER_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            public_url: get("COURIER_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{}", port)),
            max_media_bytes,
        })
    }
}
