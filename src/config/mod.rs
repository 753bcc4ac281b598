use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway's hosted payment page.
    pub pay_url: String,
    pub merchant_code: String,
    /// Shared secret for the redirect/callback HMAC signature.
    pub secret: String,
    /// Where the gateway sends the buyer (and the settlement params) back.
    pub return_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckoutConfig {
    /// Platform's cut of the gross amount, in percent.
    pub platform_fee_percent: i64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_attempts: u32,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            platform_fee_percent: 30,
            rate_limit_window_secs: 60,
            rate_limit_max_attempts: 5,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("checkout.platform_fee_percent", 30)?
            .set_default("checkout.rate_limit_window_secs", 60)?
            .set_default("checkout.rate_limit_max_attempts", 5)?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (with COURSEHUB__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("COURSEHUB").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://coursehub.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            gateway: GatewayConfig {
                pay_url: "https://sandbox.gateway.example/pay".to_string(),
                merchant_code: "COURSEHUB".to_string(),
                secret: "change-me-in-production".to_string(),
                return_url: "http://localhost:8080/payments/gateway/return".to_string(),
            },
            checkout: CheckoutConfig::default(),
        }
    }
}
