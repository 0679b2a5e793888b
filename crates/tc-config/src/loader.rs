//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "tenantcore.toml",
    "./config/config.toml",
    "./config/tenantcore.toml",
    "/etc/tenantcore/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_env_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("TENANTCORE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, value: Option<String>) {
    if let Some(parsed) = value.and_then(|v| v.parse().ok()) {
        *target = parsed;
    }
}

fn set_string(target: &mut String, value: Option<String>) {
    if let Some(v) = value {
        *target = v;
    }
}

/// Apply `TENANTCORE_*` overrides. The lookup is injected so tests don't
/// have to mutate the process environment.
pub(crate) fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    set_string(&mut config.http.host, lookup("TENANTCORE_HTTP_HOST"));
    set_parsed(&mut config.http.port, lookup("TENANTCORE_HTTP_PORT"));

    // MongoDB
    set_string(&mut config.mongodb.uri, lookup("TENANTCORE_MONGODB_URI"));
    set_string(&mut config.mongodb.database, lookup("TENANTCORE_MONGODB_DATABASE"));

    // Redis
    set_parsed(&mut config.redis.enabled, lookup("TENANTCORE_REDIS_ENABLED"));
    set_string(&mut config.redis.url, lookup("TENANTCORE_REDIS_URL"));

    // AMQP
    set_parsed(&mut config.amqp.enabled, lookup("TENANTCORE_AMQP_ENABLED"));
    set_string(&mut config.amqp.uri, lookup("TENANTCORE_AMQP_URI"));
    set_string(&mut config.amqp.exchange, lookup("TENANTCORE_AMQP_EXCHANGE"));
    set_string(&mut config.amqp.inbound_queue, lookup("TENANTCORE_AMQP_INBOUND_QUEUE"));
    set_parsed(&mut config.amqp.prefetch_count, lookup("TENANTCORE_AMQP_PREFETCH"));

    // Billing
    set_string(&mut config.billing.base_url, lookup("TENANTCORE_BILLING_URL"));
    set_parsed(&mut config.billing.timeout_secs, lookup("TENANTCORE_BILLING_TIMEOUT_SECS"));

    // Cache
    set_parsed(&mut config.cache.default_ttl_secs, lookup("TENANTCORE_CACHE_TTL_SECS"));
    set_parsed(&mut config.cache.api_key_ttl_secs, lookup("TENANTCORE_CACHE_API_KEY_TTL_SECS"));
    set_parsed(
        &mut config.cache.tenant_users_ttl_secs,
        lookup("TENANTCORE_CACHE_TENANT_USERS_TTL_SECS"),
    );

    // Tokens
    set_parsed(&mut config.tokens.max_per_hour, lookup("TENANTCORE_TOKENS_MAX_PER_HOUR"));
    set_parsed(
        &mut config.tokens.email_verification_ttl_secs,
        lookup("TENANTCORE_TOKENS_EMAIL_VERIFICATION_TTL_SECS"),
    );
    set_parsed(
        &mut config.tokens.password_reset_ttl_secs,
        lookup("TENANTCORE_TOKENS_PASSWORD_RESET_TTL_SECS"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides_applied() {
        let vars: HashMap<&str, &str> = [
            ("TENANTCORE_MONGODB_DATABASE", "tc_test"),
            ("TENANTCORE_TOKENS_MAX_PER_HOUR", "7"),
            ("TENANTCORE_REDIS_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.mongodb.database, "tc_test");
        assert_eq!(config.tokens.max_per_hour, 7);
        assert!(!config.redis.enabled);
    }

    #[test]
    fn test_unparsable_override_is_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |k| {
            (k == "TENANTCORE_HTTP_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.http.port, 9090);
    }

    #[test]
    fn test_explicit_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc.toml");
        std::fs::write(&path, "[billing]\ntimeout_secs = 3\n").unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.billing.timeout_secs, 3);
    }
}
