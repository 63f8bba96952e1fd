//! Server configuration, sourced from CLI flags or environment variables.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "kredo-server", about = "Discovery and reputation index for signed agent attestations")]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[arg(long, env = "DB_PATH", default_value = "kredo.db")]
    pub db_path: String,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Comma-separated list of origins allowed by CORS. Empty means "allow any".
    #[arg(long, env = "CORS_ALLOW_ORIGINS", default_value = "")]
    pub cors_allow_origins: String,

    /// How long a trust analysis stays cached before being recomputed, in seconds.
    #[arg(long, env = "TRUST_CACHE_TTL_SECONDS", default_value_t = 300)]
    pub trust_cache_ttl_seconds: u64,

    /// JSON object overriding the default per-endpoint-class rate limits,
    /// e.g. `{"write":{"window_seconds":60,"max_requests":30}}`.
    #[arg(long, env = "RATE_LIMITS_JSON", default_value = "")]
    pub rate_limits_json: String,

    /// Maximum accepted request body size, in bytes.
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 262_144)]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allow_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
