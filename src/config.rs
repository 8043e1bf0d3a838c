use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub admin_key: String,
    /// Mail relay endpoint. None disables the external mail channel.
    pub mail_relay_url: Option<String>,
    /// HMAC secret for signing relay payloads.
    pub mail_signing_secret: Option<String>,
    /// Public site base, used to build notification action URLs.
    pub base_url: String,
    /// TTL for the derived listing caches, in seconds.
    /// Set via SEFERET_LISTING_TTL. Default: 300.
    pub listing_cache_ttl_secs: u64,
    /// How often the expiry sweeper runs, in seconds.
    /// Set via SEFERET_EXPIRY_INTERVAL. Default: 60.
    pub expiry_sweep_interval_secs: u64,
    /// Bounded capacity of the in-process effect queue.
    pub effect_queue_capacity: usize,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = std::env::var("SEFERET_ADMIN_KEY")
        .unwrap_or_else(|_| "CHANGE_ME_ADMIN_KEY".into());

    if admin_key == "CHANGE_ME_ADMIN_KEY" {
        let env_mode = std::env::var("SEFERET_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "SEFERET_ADMIN_KEY is still the insecure placeholder. \
                 Set a proper key before running in production."
            );
        }
        eprintln!("⚠️  SEFERET_ADMIN_KEY is not set — using insecure placeholder. Set a real key for production.");
    }

    Ok(Config {
        port: std::env::var("SEFERET_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/seferet".into()),
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
        admin_key,
        mail_relay_url: std::env::var("SEFERET_MAIL_RELAY_URL").ok(),
        mail_signing_secret: std::env::var("SEFERET_MAIL_SIGNING_SECRET").ok(),
        base_url: std::env::var("SEFERET_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into()),
        listing_cache_ttl_secs: std::env::var("SEFERET_LISTING_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
        expiry_sweep_interval_secs: std::env::var("SEFERET_EXPIRY_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        effect_queue_capacity: std::env::var("SEFERET_EFFECT_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024),
    })
}
