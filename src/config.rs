use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Hosted store endpoint and public key; both must be set to use it.
    pub store: Option<(String, String)>,
    pub media_dir: PathBuf,
    pub media_bucket: String,
    pub public_url: String,
    pub settings: Settings,
    pub admin_username: String,
    pub admin_password: String,
}

/// Timing shared by every room.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub message_ttl: time::Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            message_ttl: time::Duration::minutes(2),
            poll_interval: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite::memory:".to_owned(),
            store: None,
            media_dir: PathBuf::from("media"),
            media_bucket: "void-media".to_owned(),
            public_url: "http://localhost:8080".to_owned(),
            settings: Settings::default(),
            admin_username: "admin".to_owned(),
            admin_password: "admin".to_owned(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let port: u16 = try_load("PORT", "8080");
        let store = match (env::var("STORE_URL"), env::var("STORE_KEY")) {
            (Ok(url), Ok(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => {
                info!("STORE_URL/STORE_KEY not set, using the local SQLite store");
                None
            }
        };

        Self {
            port,
            database_url: try_load("DATABASE_URL", "sqlite://anonvoidz.db?mode=rwc"),
            store,
            media_dir: try_load("MEDIA_DIR", "media"),
            media_bucket: try_load("MEDIA_BUCKET", "void-media"),
            public_url: try_load("PUBLIC_URL", &format!("http://localhost:{port}")),
            settings: Settings {
                message_ttl: time::Duration::seconds(try_load_positive("MESSAGE_TTL_SECS", "120")),
                poll_interval: Duration::from_millis(try_load_positive("POLL_INTERVAL_MS", "3000")),
                sweep_interval: Duration::from_millis(try_load_positive("SWEEP_INTERVAL_MS", "10000")),
            },
            admin_username: try_load("ADMIN_USERNAME", "admin"),
            admin_password: try_load("ADMIN_PASSWORD", "admin"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        info!("{key} not set, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .ok()
        .and_then(|value| {
            value
                .parse()
                .map_err(|e| warn!("Invalid {key} value {value:?}: {e}, using default {default}"))
                .ok()
        })
        .unwrap_or_else(|| parse_default(key, default))
}

fn parse_default<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    match default.parse() {
        Ok(value) => value,
        Err(e) => panic!("default for {key} does not parse: {e}"),
    }
}

/// Like [`try_load`], for durations and intervals: zero and negative values
/// fall back to the default.
fn try_load_positive<T: FromStr + PartialOrd + Default + Display>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    positive_or_default(key, try_load(key, default), default)
}

fn positive_or_default<T: FromStr + PartialOrd + Default + Display>(key: &str, value: T, default: &str) -> T
where
    T::Err: Display,
{
    if value > T::default() {
        return value;
    }
    warn!("{key} must be positive, got {value}, using default {default}");
    parse_default(key, default)
}
