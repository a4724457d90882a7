use std::env;

use chrono_tz::Tz;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub jwt_secret: Option<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub building_cache_ttl_seconds: u64,
    pub building_cache_max_entries: u64,
    pub billing_timezone: Tz,
    pub default_due_day: u32,
    pub default_late_payment_charge: Decimal,
    pub slip_api_url: Option<String>,
    pub slip_api_key: Option<String>,
    pub slip_api_timeout_seconds: u64,
    pub slip_max_upload_bytes: usize,
    pub notification_timeout_seconds: u64,
    pub line_api_base_url: String,
    pub slip_bucket: Option<String>,
    pub slip_public_base_url: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_region: String,
    pub scheduler_enabled: bool,
    pub bill_generation_day: u32,
    pub scheduler_daily_hour: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Apartment Billing API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            jwt_secret: env_opt("JWT_SECRET"),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            building_cache_ttl_seconds: env_parse_or("BUILDING_CACHE_TTL_SECONDS", 60),
            building_cache_max_entries: env_parse_or("BUILDING_CACHE_MAX_ENTRIES", 1000),
            billing_timezone: parse_timezone(&env_or("BILLING_TIMEZONE", "Asia/Bangkok")),
            default_due_day: clamp_due_day(env_parse_or("DEFAULT_DUE_DAY", 5)),
            default_late_payment_charge: env_parse_or(
                "DEFAULT_LATE_PAYMENT_CHARGE",
                Decimal::from(500),
            ),
            slip_api_url: env_opt("SLIP_API_URL"),
            slip_api_key: env_opt("SLIP_API_KEY"),
            slip_api_timeout_seconds: env_parse_or("SLIP_API_TIMEOUT_SECONDS", 8),
            slip_max_upload_bytes: env_parse_or("SLIP_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            notification_timeout_seconds: env_parse_or("NOTIFICATION_TIMEOUT_SECONDS", 5),
            line_api_base_url: env_or("LINE_API_BASE_URL", "https://api.line.me"),
            slip_bucket: env_opt("SLIP_BUCKET"),
            slip_public_base_url: env_opt("SLIP_PUBLIC_BASE_URL"),
            s3_endpoint_url: env_opt("S3_ENDPOINT_URL"),
            s3_region: env_or("S3_REGION", "ap-southeast-1"),
            scheduler_enabled: env_parse_bool_or("SCHEDULER_ENABLED", true),
            bill_generation_day: clamp_due_day(env_parse_or("BILL_GENERATION_DAY", 1)),
            scheduler_daily_hour: env_parse_or("SCHEDULER_DAILY_HOUR", 1u32).min(23),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_timezone(raw: &str) -> Tz {
    raw.trim().parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(timezone = raw, "Unknown BILLING_TIMEZONE, using Asia/Bangkok");
        chrono_tz::Asia::Bangkok
    })
}

fn clamp_due_day(day: u32) -> u32 {
    day.clamp(1, 31)
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{clamp_due_day, normalize_prefix, parse_csv, parse_timezone};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn parses_csv_skipping_blanks() {
        assert_eq!(
            parse_csv(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn falls_back_to_bangkok_for_unknown_timezone() {
        assert_eq!(parse_timezone("Not/AZone"), chrono_tz::Asia::Bangkok);
        assert_eq!(parse_timezone("Asia/Tokyo"), chrono_tz::Asia::Tokyo);
    }

    #[test]
    fn clamps_due_day_into_calendar_range() {
        assert_eq!(clamp_due_day(0), 1);
        assert_eq!(clamp_due_day(5), 5);
        assert_eq!(clamp_due_day(40), 31);
    }
}
