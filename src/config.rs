use dotenv::dotenv;
use serde::Deserialize;
use std::env;

/// Process-level configuration. Per-tenant provider credentials (Apple key,
/// Stripe secret, etc.) are never read from the environment — they live on
/// the `apps` row and are loaded per-request from the database.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub environment: Environment,

    /// Timeout for outbound provider API calls (Apple, Google, Paddle, Amazon, Stripe).
    pub provider_timeout_secs: u64,
    /// Timeout for each customer webhook delivery attempt. Fixed at 30s per spec.
    pub webhook_timeout_secs: u64,
    /// Sweep interval for the webhook retry runner.
    pub retry_sweep_interval_secs: u64,
    /// Maximum deliveries pulled per retry sweep.
    pub retry_sweep_batch_size: i64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./data/paycat.db".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .expect("PORT must be a number");
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let environment_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let environment = match environment_str.to_lowercase().as_str() {
            "production" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        };

        let provider_timeout_secs = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);
        let webhook_timeout_secs = env::var("WEBHOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let retry_sweep_interval_secs = env::var("RETRY_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let retry_sweep_batch_size = env::var("RETRY_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        Config {
            database_url,
            host,
            port,
            log_level,
            environment,
            provider_timeout_secs,
            webhook_timeout_secs,
            retry_sweep_interval_secs,
            retry_sweep_batch_size,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_env_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in [
            "DATABASE_URL",
            "HOST",
            "PORT",
            "LOG_LEVEL",
            "ENVIRONMENT",
            "PROVIDER_TIMEOUT_SECS",
            "WEBHOOK_TIMEOUT_SECS",
            "RETRY_SWEEP_INTERVAL_SECS",
            "RETRY_SWEEP_BATCH_SIZE",
        ] {
            env::remove_var(var);
        }
        let config = Config::from_env();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.webhook_timeout_secs, 30);
        assert!(!config.is_production());
    }
}
