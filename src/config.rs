use crate::domain::Asset;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub tenant_id: String,
    pub default_cash_desk_id: String,
    pub fiat_assets: Vec<Asset>,
    pub inverse_quoted_assets: Vec<Asset>,
    pub lock_timeout_ms: u64,
}

/// How a fiat's `rate_used` is quoted against USDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    /// Fiat per USDT (e.g. 23.5 CZK for 1 USDT).
    Direct,
    /// USDT per fiat (e.g. 1.08 USDT for 1 EUR).
    Inverse,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let tenant_id = non_empty(&env_map, "TENANT_ID", "default")?;
        let default_cash_desk_id = non_empty(&env_map, "DEFAULT_CASH_DESK_ID", "main")?;

        let fiat_assets = parse_asset_list(&env_map, "FIAT_ASSETS", "CZK,USD,EUR");
        if fiat_assets.is_empty() {
            return Err(ConfigError::InvalidValue(
                "FIAT_ASSETS".to_string(),
                "must list at least one currency".to_string(),
            ));
        }
        if fiat_assets.contains(&Asset::usdt()) {
            return Err(ConfigError::InvalidValue(
                "FIAT_ASSETS".to_string(),
                "USDT is not a fiat currency".to_string(),
            ));
        }

        let inverse_quoted_assets = parse_asset_list(&env_map, "INVERSE_QUOTED_ASSETS", "EUR");
        if let Some(unknown) = inverse_quoted_assets
            .iter()
            .find(|a| !fiat_assets.contains(a))
        {
            return Err(ConfigError::InvalidValue(
                "INVERSE_QUOTED_ASSETS".to_string(),
                format!("{} is not listed in FIAT_ASSETS", unknown),
            ));
        }

        let lock_timeout_ms = env_map
            .get("LOCK_TIMEOUT_MS")
            .map(|s| s.as_str())
            .unwrap_or("5000")
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "LOCK_TIMEOUT_MS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        Ok(Config {
            port,
            database_path,
            tenant_id,
            default_cash_desk_id,
            fiat_assets,
            inverse_quoted_assets,
            lock_timeout_ms,
        })
    }

    /// Configuration for tests and embedded use: defaults with the given database.
    pub fn with_database(database_path: impl Into<String>) -> Self {
        Config {
            port: 8080,
            database_path: database_path.into(),
            tenant_id: "default".to_string(),
            default_cash_desk_id: "main".to_string(),
            fiat_assets: ["CZK", "USD", "EUR"].iter().map(Asset::new).collect(),
            inverse_quoted_assets: vec![Asset::new("EUR")],
            lock_timeout_ms: 5000,
        }
    }

    /// True if the asset carries fiat lots.
    pub fn is_fiat(&self, asset: &Asset) -> bool {
        self.fiat_assets.contains(asset)
    }

    pub fn quote_for(&self, asset: &Asset) -> Quote {
        if self.inverse_quoted_assets.contains(asset) {
            Quote::Inverse
        } else {
            Quote::Direct
        }
    }
}

fn non_empty(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<String, ConfigError> {
    let value = env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| default.to_string());
    if value.is_empty() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must not be empty".to_string(),
        ));
    }
    Ok(value)
}

fn parse_asset_list(env_map: &HashMap<String, String>, key: &str, default: &str) -> Vec<Asset> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    let mut assets: Vec<Asset> = Vec::new();
    for asset in raw.split(',').map(Asset::new).filter(|a| !a.is_empty()) {
        if !assets.contains(&asset) {
            assets.push(asset);
        }
    }
    assets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.tenant_id, "default");
        assert_eq!(cfg.default_cash_desk_id, "main");
        assert_eq!(
            cfg.fiat_assets,
            vec![Asset::new("CZK"), Asset::new("USD"), Asset::new("EUR")]
        );
        assert_eq!(cfg.quote_for(&Asset::new("EUR")), Quote::Inverse);
        assert_eq!(cfg.quote_for(&Asset::new("CZK")), Quote::Direct);
        assert_eq!(cfg.lock_timeout_ms, 5000);
        assert!(cfg.is_fiat(&Asset::new("usd")));
        assert!(!cfg.is_fiat(&Asset::usdt()));
    }

    #[test]
    fn test_missing_database_path() {
        let result = Config::from_env_map(HashMap::new());
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_inverse_quote_must_be_fiat() {
        let mut env_map = setup_required_env();
        env_map.insert("FIAT_ASSETS".to_string(), "CZK,USD".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, msg)) => {
                assert_eq!(k, "INVERSE_QUOTED_ASSETS");
                assert!(msg.contains("EUR"));
            }
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("LOCK_TIMEOUT_MS".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "LOCK_TIMEOUT_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_fiat_list_normalized_and_deduplicated() {
        let mut env_map = setup_required_env();
        env_map.insert("FIAT_ASSETS".to_string(), " czk, eur ,CZK,".to_string());
        let cfg = Config::from_env_map(env_map).unwrap();
        assert_eq!(cfg.fiat_assets, vec![Asset::new("CZK"), Asset::new("EUR")]);
    }

    #[test]
    fn test_usdt_is_not_fiat() {
        let mut env_map = setup_required_env();
        env_map.insert("FIAT_ASSETS".to_string(), "CZK,USDT".to_string());
        env_map.insert("INVERSE_QUOTED_ASSETS".to_string(), "".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "FIAT_ASSETS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
