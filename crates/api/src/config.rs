//! API server configuration

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Optional direct (non-pooled) URL for migrations
    pub database_direct_url: Option<String>,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Shared key for the admin endpoints (X-Admin-Key header)
    pub admin_api_key: String,
    /// Comma-separated CORS origin allowlist
    pub allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let admin_api_key = std::env::var("ADMIN_API_KEY")
            .map_err(|_| anyhow::anyhow!("ADMIN_API_KEY must be set"))?;
        if admin_api_key.len() < 16 {
            anyhow::bail!("ADMIN_API_KEY must be at least 16 characters");
        }

        Ok(Self {
            database_url,
            database_direct_url: std::env::var("DATABASE_DIRECT_URL").ok(),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            admin_api_key,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
        })
    }
}
