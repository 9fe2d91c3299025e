use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub fees: FeeConfig,
    pub grace_period_days: i64,
    /// UTC hour (0-23) the daily grace-period check runs at
    pub settlement_check_hour_utc: u32,
    pub rail: RailConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct FeeConfig {
    pub platform_fee_pct: Decimal,
    pub processor_pct_fee: Decimal,
    pub processor_fixed_fee: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_fee_pct: dec!(0.10),
            processor_pct_fee: dec!(0.029),
            processor_fixed_fee: dec!(0.30),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RailConfig {
    pub base_url: String,
    pub secret_key: String,
    /// ISO 4217 code, lowercase, as the rail expects it
    pub currency: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    pub endpoint_url: String,
    pub from_address: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/settlement".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            fees: FeeConfig {
                platform_fee_pct: decimal_env("PLATFORM_FEE_PCT", dec!(0.10))?,
                processor_pct_fee: decimal_env("PROCESSOR_PCT_FEE", dec!(0.029))?,
                processor_fixed_fee: decimal_env("PROCESSOR_FIXED_FEE", dec!(0.30))?,
            },
            grace_period_days: int_env("PLATFORM_FEE_GRACE_PERIOD_DAYS", 60)?,
            settlement_check_hour_utc: int_env("SETTLEMENT_CHECK_HOUR_UTC", 2)? as u32,
            rail: RailConfig {
                base_url: std::env::var("PAYMENT_RAIL_URL")
                    .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
                secret_key: std::env::var("PAYMENT_RAIL_SECRET").unwrap_or_default(),
                currency: std::env::var("PAYMENT_RAIL_CURRENCY")
                    .unwrap_or_else(|_| "usd".to_string()),
                timeout_secs: int_env("PAYMENT_RAIL_TIMEOUT_SECS", 30)? as u64,
                max_retries: int_env("PAYMENT_RAIL_MAX_RETRIES", 3)? as u32,
            },
            notifier: NotifierConfig {
                endpoint_url: std::env::var("NOTIFIER_URL")
                    .unwrap_or_else(|_| "http://localhost:8025/send".to_string()),
                from_address: std::env::var("NOTIFIER_FROM")
                    .unwrap_or_else(|_| "noreply@marketplace.local".to_string()),
                timeout_secs: int_env("NOTIFIER_TIMEOUT_SECS", 10)? as u64,
            },
        })
    }
}

fn decimal_env(key: &str, default: Decimal) -> Result<Decimal, config::ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<Decimal>().map_err(|e| {
            config::ConfigError::Message(format!("{} is not a decimal: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

fn int_env(key: &str, default: i64) -> Result<i64, config::ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|e| config::ConfigError::Message(format!("{} is not an integer: {}", key, e))),
        Err(_) => Ok(default),
    }
}
