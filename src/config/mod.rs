use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rides: RideConfig,
    #[serde(default)]
    pub organizations: OrganizationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign session tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Lifetime of an issued session token in days
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
    /// Only identities with an email in this domain may register
    #[serde(default = "default_allowed_email_domain")]
    pub allowed_email_domain: String,
    /// Emails that become system admins on registration
    #[serde(default)]
    pub admin_emails: Vec<String>,
    /// OAuth client ID the identity tokens must be issued for
    pub google_client_id: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_days: default_token_ttl_days(),
            allowed_email_domain: default_allowed_email_domain(),
            admin_emails: Vec::new(),
            google_client_id: None,
        }
    }
}

fn default_jwt_secret() -> String {
    // Sessions will not survive a restart unless a secret is configured
    uuid::Uuid::new_v4().to_string()
}

fn default_token_ttl_days() -> i64 {
    7
}

fn default_allowed_email_domain() -> String {
    "uci.edu".to_string()
}

impl AuthConfig {
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RideConfig {
    /// Seats offered by a driver post that does not state its capacity
    #[serde(default = "default_driver_capacity")]
    pub default_driver_capacity: i64,
    /// Seats of a rider request that does not state its capacity
    #[serde(default = "default_request_capacity")]
    pub default_request_capacity: i64,
    /// Upper bound accepted for max_riders
    #[serde(default = "default_max_capacity")]
    pub max_capacity: i64,
    /// Hard cap on the page size of ride listings
    #[serde(default = "default_listing_page_limit")]
    pub listing_page_limit: i64,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            default_driver_capacity: default_driver_capacity(),
            default_request_capacity: default_request_capacity(),
            max_capacity: default_max_capacity(),
            listing_page_limit: default_listing_page_limit(),
        }
    }
}

fn default_driver_capacity() -> i64 {
    4
}

fn default_request_capacity() -> i64 {
    1
}

fn default_max_capacity() -> i64 {
    8
}

fn default_listing_page_limit() -> i64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationConfig {
    #[serde(default = "default_access_code_length")]
    pub access_code_length: usize,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            access_code_length: default_access_code_length(),
        }
    }
}

fn default_access_code_length() -> usize {
    6
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            window_seconds: default_window_seconds(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_window_seconds() -> u64 {
    60
}

fn default_api_requests() -> u32 {
    300
}

fn default_auth_requests() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rides: RideConfig::default(),
            organizations: OrganizationConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
