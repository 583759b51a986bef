use crate::core::kernel::ws::{ReconnectPolicy, WsConfig};
use crate::core::types::{Allowance, Amount};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_ENDPOINT: &str = "wss://clearnet.yellow.com/ws";
pub const DEFAULT_APPLICATION: &str = "0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc";
pub const DEFAULT_SCOPE: &str = "console";
pub const DEFAULT_APP_NAME: &str = "clearnode-client";
pub const DEFAULT_ASSET: &str = "usdc";
pub const DEFAULT_ESCROW_AMOUNT: &str = "0.001";
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Hex private key of the session key; a fresh one is generated when absent
    pub session_key: Option<Secret<String>>,
    /// Hex private key of the wallet used for the typed-data handshake
    pub wallet_key: Option<Secret<String>>,
    pub app_name: String,
    pub scope: String,
    pub application: String,
    pub token_ttl_secs: i64,
    pub allowances: Vec<Allowance>,
    pub counterparty: Option<String>,
    pub asset: String,
    pub escrow_amount: Amount,
    pub store_path: Option<PathBuf>,
    pub ws: WsConfig,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_key: None,
            wallet_key: None,
            app_name: DEFAULT_APP_NAME.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            application: DEFAULT_APPLICATION.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            allowances: Vec::new(),
            counterparty: None,
            asset: DEFAULT_ASSET.to_string(),
            escrow_amount: DEFAULT_ESCROW_AMOUNT
                .parse()
                .unwrap_or(Amount::ZERO),
            store_path: None,
            ws: WsConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// Custom Serialize implementation - never expose key material
impl Serialize for ClientConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let redact = |key: &Option<Secret<String>>| key.as_ref().map(|_| "[REDACTED]");

        let mut state = serializer.serialize_struct("ClientConfig", 14)?;
        state.serialize_field("endpoint", &self.endpoint)?;
        state.serialize_field("session_key", &redact(&self.session_key))?;
        state.serialize_field("wallet_key", &redact(&self.wallet_key))?;
        state.serialize_field("app_name", &self.app_name)?;
        state.serialize_field("scope", &self.scope)?;
        state.serialize_field("application", &self.application)?;
        state.serialize_field("token_ttl_secs", &self.token_ttl_secs)?;
        state.serialize_field("allowances", &self.allowances)?;
        state.serialize_field("counterparty", &self.counterparty)?;
        state.serialize_field("asset", &self.asset)?;
        state.serialize_field("escrow_amount", &self.escrow_amount)?;
        state.serialize_field("store_path", &self.store_path)?;
        state.serialize_field("ws", &self.ws)?;
        state.serialize_field("reconnect", &self.reconnect)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ClientConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(default)]
        struct ClientConfigHelper {
            endpoint: String,
            session_key: Option<String>,
            wallet_key: Option<String>,
            app_name: String,
            scope: String,
            application: String,
            token_ttl_secs: i64,
            allowances: Vec<Allowance>,
            counterparty: Option<String>,
            asset: String,
            escrow_amount: Amount,
            store_path: Option<PathBuf>,
            ws: WsConfig,
            reconnect: ReconnectPolicy,
        }

        impl Default for ClientConfigHelper {
            fn default() -> Self {
                let defaults = ClientConfig::default();
                Self {
                    endpoint: defaults.endpoint,
                    session_key: None,
                    wallet_key: None,
                    app_name: defaults.app_name,
                    scope: defaults.scope,
                    application: defaults.application,
                    token_ttl_secs: defaults.token_ttl_secs,
                    allowances: defaults.allowances,
                    counterparty: defaults.counterparty,
                    asset: defaults.asset,
                    escrow_amount: defaults.escrow_amount,
                    store_path: defaults.store_path,
                    ws: defaults.ws,
                    reconnect: defaults.reconnect,
                }
            }
        }

        let helper = ClientConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            endpoint: helper.endpoint,
            session_key: helper.session_key.map(Secret::new),
            wallet_key: helper.wallet_key.map(Secret::new),
            app_name: helper.app_name,
            scope: helper.scope,
            application: helper.application,
            token_ttl_secs: helper.token_ttl_secs,
            allowances: helper.allowances,
            counterparty: helper.counterparty,
            asset: helper.asset,
            escrow_amount: helper.escrow_amount,
            store_path: helper.store_path,
            ws: helper.ws,
            reconnect: helper.reconnect,
        })
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Every variable is optional:
    /// - `{PREFIX}_URL`
    /// - `{PREFIX}_SESSION_KEY`, `{PREFIX}_WALLET_KEY` (hex private keys)
    /// - `{PREFIX}_APP_NAME`, `{PREFIX}_SCOPE`, `{PREFIX}_APPLICATION`
    /// - `{PREFIX}_TOKEN_TTL` (seconds)
    /// - `{PREFIX}_ALLOWANCES` (`usdc:100,eth:1`)
    /// - `{PREFIX}_COUNTERPARTY`, `{PREFIX}_ASSET`, `{PREFIX}_ESCROW_AMOUNT`
    /// - `{PREFIX}_STORE_PATH`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();

        let mut config = Self::default();

        if let Some(endpoint) = var("URL") {
            config.endpoint = endpoint;
        }
        config.session_key = var("SESSION_KEY").map(Secret::new);
        config.wallet_key = var("WALLET_KEY").map(Secret::new);
        if let Some(app_name) = var("APP_NAME") {
            config.app_name = app_name;
        }
        if let Some(scope) = var("SCOPE") {
            config.scope = scope;
        }
        if let Some(application) = var("APPLICATION") {
            config.application = application;
        }
        if let Some(ttl) = var("TOKEN_TTL") {
            config.token_ttl_secs = ttl.parse().map_err(|_| {
                ConfigError::InvalidConfiguration(format!("{}_TOKEN_TTL: {}", prefix, ttl))
            })?;
        }
        if let Some(allowances) = var("ALLOWANCES") {
            config.allowances = parse_allowances(&allowances)?;
        }
        config.counterparty = var("COUNTERPARTY");
        if let Some(asset) = var("ASSET") {
            config.asset = asset;
        }
        if let Some(amount) = var("ESCROW_AMOUNT") {
            config.escrow_amount = amount.parse().map_err(|e| {
                ConfigError::InvalidConfiguration(format!("{}_ESCROW_AMOUNT: {}", prefix, e))
            })?;
        }
        config.store_path = var("STORE_PATH").map(PathBuf::from);

        Ok(config)
    }

    /// Create configuration from .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no .env file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Load configuration with automatic .env file detection
    ///
    /// Tries `.env.local`, `.env.{ENVIRONMENT}` and `.env` in that order and
    /// loads only the first one found.
    #[cfg(feature = "env-file")]
    pub fn from_env_auto(prefix: &str) -> Result<Self, ConfigError> {
        let env_files = [
            ".env.local".to_string(),
            format!(
                ".env.{}",
                env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
            ),
            ".env".to_string(),
        ];

        for env_file in &env_files {
            match dotenv::from_path(env_file) {
                Ok(_) => break,
                Err(dotenv::Error::Io(io_err))
                    if io_err.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "Failed to load .env file '{}': {}",
                        env_file, e
                    )));
                }
            }
        }

        Self::from_env(prefix)
    }

    #[must_use]
    pub fn session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(Secret::new(key.into()));
        self
    }

    #[must_use]
    pub fn wallet_key(mut self, key: impl Into<String>) -> Self {
        self.wallet_key = Some(Secret::new(key.into()));
        self
    }

    #[must_use]
    pub fn counterparty(mut self, address: impl Into<String>) -> Self {
        self.counterparty = Some(address.into());
        self
    }

    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn allowances(mut self, allowances: Vec<Allowance>) -> Self {
        self.allowances = allowances;
        self
    }

    #[must_use]
    pub fn has_wallet_key(&self) -> bool {
        self.wallet_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().is_empty())
    }

    /// Session key hex (use carefully - exposes secret)
    pub fn session_key_hex(&self) -> Option<&str> {
        self.session_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
            .filter(|key| !key.is_empty())
    }

    /// Wallet key hex (use carefully - exposes secret)
    pub fn wallet_key_hex(&self) -> Option<&str> {
        self.wallet_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
            .filter(|key| !key.is_empty())
    }
}

fn parse_allowances(raw: &str) -> Result<Vec<Allowance>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(symbol, amount)| Allowance::new(symbol.trim(), amount.trim()))
                .ok_or_else(|| {
                    ConfigError::InvalidConfiguration(format!(
                        "allowance '{}' is not in symbol:amount form",
                        entry
                    ))
                })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
