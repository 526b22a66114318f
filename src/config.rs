use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub storage_base_url: String,
    pub storage_signing_key: String,
    pub playback_ttl_secs: i64,
    pub upload_ttl_secs: i64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("EDUTOK_PORT", "3000"),
            database_url: try_load("EDUTOK_DATABASE_URL", "sqlite://edutok.db"),
            storage_base_url: try_load("EDUTOK_STORAGE_URL", "http://localhost:9000/edutok"),
            storage_signing_key: read_secret("STORAGE_SIGNING_KEY"),
            playback_ttl_secs: try_load("EDUTOK_PLAYBACK_TTL", "600"),
            upload_ttl_secs: try_load("EDUTOK_UPLOAD_TTL", "900"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

/// Secrets come from the environment in development and from mounted
/// secret files in deployment.
fn read_secret(secret_name: &str) -> String {
    if let Ok(value) = env::var(secret_name) {
        return value.trim().to_string();
    }

    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .expect("Secrets misconfigured!")
}
