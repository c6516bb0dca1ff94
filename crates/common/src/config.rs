use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string. When unset the receipt reconciler runs without a lease.
    pub redis_url: Option<String>,

    /// JWT secret for admin API authentication
    pub jwt_secret: String,

    /// JWT token expiry in hours
    pub jwt_expiry_hours: u64,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP server binds to (default: 3000)
    pub http_port: u16,

    /// Emit logs as JSON lines instead of the human-readable format
    pub log_json: bool,

    /// Base URL of the Expo push API (default: https://exp.host/--/api/v2)
    pub expo_api_url: String,

    /// Optional Expo access token for projects with enhanced push security
    pub expo_access_token: Option<String>,

    /// Total send attempts per chunk, including the first (default: 3)
    pub push_max_attempts: u32,

    /// Base delay for exponential backoff between attempts, in milliseconds (default: 1000)
    pub push_retry_base_ms: u64,

    /// Android notification channel attached to Android messages
    pub push_android_channel_id: String,

    /// Badge count attached to iOS messages
    pub push_ios_badge: u32,

    /// Delay between dispatch and receipt reconciliation, in seconds (default: 900)
    pub receipt_check_delay_secs: u64,

    /// How often the reconciler looks for due receipt checks, in seconds (default: 30)
    pub receipt_poll_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL").ok(),
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_expiry_hours: parse_var("JWT_EXPIRY_HOURS", "24")?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            http_port: parse_var("HTTP_PORT", "3000")?,
            log_json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            expo_api_url: std::env::var("EXPO_API_URL")
                .unwrap_or_else(|_| "https://exp.host/--/api/v2".to_string()),
            expo_access_token: std::env::var("EXPO_ACCESS_TOKEN").ok(),
            push_max_attempts: parse_var("PUSH_MAX_ATTEMPTS", "3")?,
            push_retry_base_ms: parse_var("PUSH_RETRY_BASE_MS", "1000")?,
            push_android_channel_id: std::env::var("PUSH_ANDROID_CHANNEL_ID")
                .unwrap_or_else(|_| "default".to_string()),
            push_ios_badge: parse_var("PUSH_IOS_BADGE", "1")?,
            receipt_check_delay_secs: parse_var("RECEIPT_CHECK_DELAY_SECS", "900")?,
            receipt_poll_interval_secs: parse_var("RECEIPT_POLL_INTERVAL_SECS", "30")?,
        })
    }
}

/// Read `name` from the environment (falling back to `default`) and parse it.
fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        })
}
