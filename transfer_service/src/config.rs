use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuración del servicio, cargada desde variables de entorno con
/// defaults razonables. `dotenvy` se encarga del archivo `.env` en `main`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: String,
    pub default_daily_limit: Decimal,
    pub default_monthly_limit: Decimal,
    /// Timeout (y TTL del lease) para escrituras de balance.
    pub write_lock_timeout: Duration,
    /// Timeout (y TTL del lease) para refrescos de lectura.
    pub read_lock_timeout: Duration,
    /// Ventana de frescura del balance cacheado en lecturas.
    pub balance_cache_freshness: Duration,
}

impl AppConfig {
    /// Lee la configuración del entorno. `DATABASE_URL` y `REDIS_URL` son
    /// obligatorias; el resto tiene defaults.
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT").unwrap_or_else(|_| "3000".to_string()),
            default_daily_limit: decimal_env("DEFAULT_DAILY_LIMIT", "10000"),
            default_monthly_limit: decimal_env("DEFAULT_MONTHLY_LIMIT", "100000"),
            write_lock_timeout: Duration::from_millis(millis_env("WRITE_LOCK_TIMEOUT_MS", 30_000)),
            read_lock_timeout: Duration::from_millis(millis_env("READ_LOCK_TIMEOUT_MS", 5_000)),
            balance_cache_freshness: Duration::from_secs(60),
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            host: "127.0.0.1".to_string(),
            port: "3000".to_string(),
            default_daily_limit: Decimal::from(10_000),
            default_monthly_limit: Decimal::from(100_000),
            write_lock_timeout: Duration::from_secs(30),
            read_lock_timeout: Duration::from_secs(5),
            balance_cache_freshness: Duration::from_secs(60),
        }
    }
}

fn decimal_env(name: &str, default: &str) -> Decimal {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).unwrap_or_else(|_| {
        tracing::warn!("Invalid decimal in {}: {:?}, using default {}", name, raw, default);
        Decimal::from_str(default).unwrap_or_default()
    })
}

fn millis_env(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
