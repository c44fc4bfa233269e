use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub data_service: DataServiceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_database_url() -> String {
    "sqlite:kiosko.db?mode=rwc".to_string()
}

/// Where topic lookups are sent.
#[derive(Debug, Deserialize, Clone)]
pub struct DataServiceConfig {
    #[serde(default = "default_data_service_url")]
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as `x-functions-key` when the service requires a function key
    #[serde(default)]
    pub function_key: Option<String>,
}

fn default_data_service_url() -> String {
    "http://localhost:7071/api/get-news-data".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            url: default_data_service_url(),
            timeout_secs: default_timeout_secs(),
            function_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Session token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_token_ttl_hours() -> i64 {
    4
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingConfig {
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: i64,
}

fn default_per_page() -> i64 {
    10
}

fn default_max_per_page() -> i64 {
    50
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
