use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CONFIG_FILE: &str = "config/tenant-migrate.toml";
const ENV_PREFIX: &str = "TENANT_MIGRATE";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub stored_logic: StoredLogicSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Dial and pool-acquire timeout.
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Budget for one table (create + copy). Exceeding it fails the table, not the run.
    #[serde(default = "default_table_secs")]
    pub table_secs: u64,
    /// Per-request timeout on HTTP engines.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            table_secs: default_table_secs(),
            request_secs: default_request_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs.max(1))
    }

    pub fn table(&self) -> Duration {
        Duration::from_secs(self.table_secs.max(1))
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySettings {
    /// Probed when schema enumeration is refused.
    #[serde(default = "default_fallback_schemas")]
    pub fallback_schemas: Vec<String>,
    /// How many schemas the discovery test endpoint samples.
    #[serde(default = "default_sample_schemas")]
    pub sample_schemas: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            fallback_schemas: default_fallback_schemas(),
            sample_schemas: default_sample_schemas(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoredLogicSettings {
    /// PostgreSQL roles granted EXECUTE on every routine.
    #[serde(default = "default_grant_roles")]
    pub grant_roles: Vec<String>,
    /// MySQL accounts (`user@host`) granted EXECUTE on every routine.
    #[serde(default)]
    pub mysql_grantees: Vec<String>,
    /// Schema or database the routines are created in.
    #[serde(default = "default_routine_schema")]
    pub routine_schema: String,
}

impl Default for StoredLogicSettings {
    fn default() -> Self {
        Self {
            grant_roles: default_grant_roles(),
            mysql_grantees: Vec::new(),
            routine_schema: default_routine_schema(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_connect_secs() -> u64 {
    10
}

fn default_table_secs() -> u64 {
    600
}

fn default_request_secs() -> u64 {
    60
}

fn default_fallback_schemas() -> Vec<String> {
    ["2025", "2024", "2023"]
        .iter()
        .flat_map(|year| ["bu01", "bu02", "bu03"].iter().map(move |bu| format!("{}_{}", year, bu)))
        .collect()
}

fn default_sample_schemas() -> usize {
    2
}

fn default_grant_roles() -> Vec<String> {
    vec!["anon".to_string(), "authenticated".to_string()]
}

fn default_routine_schema() -> String {
    "public".to_string()
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("discovery.fallback_schemas")
        .with_list_parse_key("stored_logic.grant_roles")
        .with_list_parse_key("stored_logic.mysql_grantees")
        .try_parsing(true)
}

impl AppConfig {
    /// Load from `config/tenant-migrate.toml` (optional), then `TENANT_MIGRATE__*` env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(env_source());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("Failed to load {}, falling back to env: {}", CONFIG_FILE, err);
                }
                Config::builder()
                    .add_source(env_source())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        Self::from_config(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Self::from_config(settings)
    }

    fn from_config(settings: Config) -> Result<Self, ConfigError> {
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(ConfigError::Message("server.bind_addr must not be empty".to_string()));
        }
        if self.stored_logic.routine_schema.trim().is_empty() {
            return Err(ConfigError::Message(
                "stored_logic.routine_schema must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self
            .stored_logic
            .grant_roles
            .iter()
            .chain(self.stored_logic.mysql_grantees.iter())
            .find(|role| !is_safe_grantee(role))
        {
            return Err(ConfigError::Message(format!("invalid grantee: {}", bad)));
        }
        Ok(())
    }
}

/// Grantees are spliced into GRANT statements, so only plain names (and `user@host`) pass.
pub fn is_safe_grantee(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@' | '.' | '%'))
}
