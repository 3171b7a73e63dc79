use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct OrmConfig {
    pub table_prefix: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    /// Forces a mutability requirement on every connection selection when set.
    /// `true` pins reads to a primary; unset lets reads use any endpoint.
    pub mutable: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Logical cache partition the external store files results under.
    pub key: String,
    /// Namespace prefix prepended by the external store.
    pub prefix: String,
    /// Default TTL in seconds for cached results; 0 means no expiry.
    pub expiry_secs: u64,
}

impl OrmConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("table_prefix", "")?
            .set_default("cache.enabled", false)?
            .set_default("cache.key", "db")?
            .set_default("cache.prefix", "objects/")?
            .set_default("cache.expiry_secs", 0)?;

        // Load from environment variables
        if let Ok(prefix) = env::var("ORM_TABLE_PREFIX") {
            builder = builder.set_override("table_prefix", prefix)?;
        }

        if let Ok(mutable) = env::var("ORM_CONNECTION_MUTABLE") {
            builder = builder
                .set_override("connection.mutable", mutable.parse::<bool>().unwrap_or(false))?;
        }

        if let Ok(enabled) = env::var("ORM_CACHE_ENABLED") {
            builder =
                builder.set_override("cache.enabled", enabled.parse::<bool>().unwrap_or(false))?;
        }

        if let Ok(key) = env::var("ORM_CACHE_KEY") {
            builder = builder.set_override("cache.key", key)?;
        }

        if let Ok(prefix) = env::var("ORM_CACHE_PREFIX") {
            builder = builder.set_override("cache.prefix", prefix)?;
        }

        if let Ok(expiry) = env::var("ORM_CACHE_EXPIRY") {
            builder =
                builder.set_override("cache.expiry_secs", expiry.parse::<u64>().unwrap_or(0))?;
        }

        // Try to load from .env file
        let _ = dotenv::dotenv();

        builder.build()?.try_deserialize()
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            connection: ConnectionConfig { mutable: None },
            cache: CacheConfig {
                enabled: false,
                key: "db".to_string(),
                prefix: "objects/".to_string(),
                expiry_secs: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        env::remove_var("ORM_TABLE_PREFIX");
        env::remove_var("ORM_CACHE_ENABLED");

        let config = OrmConfig::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.table_prefix, "");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.key, "db");
        assert!(config.connection.mutable.is_none());
    }
}
