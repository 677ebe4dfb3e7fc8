use std::{env, net::SocketAddr};

use anyhow::{anyhow, Context, Result};
use objstore_db::{DatabaseOptions, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_VALUE_SIZE};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DB_URL: &str = "sqlite:///var/db/objects.db";

/// Runtime settings read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub db_url: String,
    pub db_options: DatabaseOptions,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Unset and blank
    /// variables fall back to defaults; malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let listen_addr = var("OBJSTORE_API_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("invalid OBJSTORE_API_ADDR")?;

        let db_url = var("OBJSTORE_DB_DSN")
            .or_else(|| var("DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DB_URL.to_string());

        let max_connections = match var("OBJSTORE_DB_MAX_CONNECTIONS") {
            Some(raw) => {
                let parsed: u32 = raw
                    .parse()
                    .with_context(|| format!("invalid OBJSTORE_DB_MAX_CONNECTIONS '{raw}'"))?;
                if parsed == 0 {
                    return Err(anyhow!("OBJSTORE_DB_MAX_CONNECTIONS must be at least 1"));
                }
                parsed
            }
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let max_value_size = match var("OBJSTORE_MAX_VALUE_SIZE") {
            Some(raw) => parse_max_value_size(&raw)?,
            None => Some(DEFAULT_MAX_VALUE_SIZE),
        };

        Ok(Self {
            listen_addr,
            db_url,
            db_options: DatabaseOptions {
                max_connections,
                max_value_size,
            },
        })
    }
}

/// `0`, `none` and `unlimited` turn the size check off.
pub fn parse_max_value_size(raw: &str) -> Result<Option<usize>> {
    match raw.to_ascii_lowercase().as_str() {
        "0" | "none" | "unlimited" => Ok(None),
        other => other
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("invalid OBJSTORE_MAX_VALUE_SIZE '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.db_url, "sqlite:///var/db/objects.db");
        assert_eq!(config.db_options, DatabaseOptions::default());
    }

    #[test]
    fn dsn_takes_precedence_over_database_url() {
        let config = config_from(&[
            ("OBJSTORE_DB_DSN", "sqlite://./a.db"),
            ("DATABASE_URL", "sqlite://./b.db"),
        ])
        .unwrap();
        assert_eq!(config.db_url, "sqlite://./a.db");

        let config = config_from(&[("DATABASE_URL", "sqlite://./b.db")]).unwrap();
        assert_eq!(config.db_url, "sqlite://./b.db");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("OBJSTORE_API_ADDR", "127.0.0.1:9000"),
            ("OBJSTORE_DB_MAX_CONNECTIONS", "2"),
            ("OBJSTORE_MAX_VALUE_SIZE", " 128 "),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.db_options.max_connections, 2);
        assert_eq!(config.db_options.max_value_size, Some(128));
    }

    #[test]
    fn max_value_size_can_be_disabled() {
        for raw in ["0", "none", "Unlimited"] {
            assert_eq!(parse_max_value_size(raw).unwrap(), None);
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = config_from(&[("OBJSTORE_API_ADDR", "not-an-addr")]).unwrap_err();
        assert!(err.to_string().contains("OBJSTORE_API_ADDR"));

        let err = config_from(&[("OBJSTORE_MAX_VALUE_SIZE", "-5")]).unwrap_err();
        assert!(err.to_string().contains("OBJSTORE_MAX_VALUE_SIZE '-5'"));

        let err = config_from(&[("OBJSTORE_DB_MAX_CONNECTIONS", "0")]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
