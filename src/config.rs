use chrono::{Duration, FixedOffset};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub admin: Option<AdminConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub sentinel_enabled: bool,
    pub sentinel_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    // Limit given to a quota record when it is first created
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: u32,
    // Offset of the timezone used to bucket tasks into days
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub user_id: u64,
    pub email: String,
}

fn default_daily_limit() -> u32 {
    5
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

// One year
const MAX_SESSION_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: default_daily_limit(),
            utc_offset_minutes: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
        }
    }
}

impl QuotaConfig {
    pub fn with_limit(default_daily_limit: u32) -> Self {
        Self {
            default_daily_limit,
            ..Self::default()
        }
    }

    pub fn timezone(&self) -> Result<FixedOffset, config::ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            config::ConfigError::Message(format!(
                "quota.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Result<Duration, config::ConfigError> {
        if self.ttl_seconds == 0 || self.ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(config::ConfigError::Message(format!(
                "session.ttl_seconds must be between 1 and {}: {}",
                MAX_SESSION_TTL_SECONDS, self.ttl_seconds
            )));
        }
        Ok(Duration::seconds(self.ttl_seconds as i64))
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config/default")
    }

    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        // Reject a bad offset at startup rather than on the first request
        config.quota.timezone()?;
        config.session.ttl()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_defaults_to_five_tasks_in_utc() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.default_daily_limit, 5);
        assert_eq!(quota.timezone().unwrap(), FixedOffset::east_opt(0).unwrap());
    }

    #[test]
    fn timezone_follows_offset() {
        let quota = QuotaConfig {
            default_daily_limit: 5,
            utc_offset_minutes: 7 * 60,
        };
        assert_eq!(quota.timezone().unwrap().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let quota = QuotaConfig {
            default_daily_limit: 5,
            utc_offset_minutes: 48 * 60,
        };
        assert!(quota.timezone().is_err());
    }

    #[test]
    fn session_ttl_must_be_positive_and_bounded() {
        assert_eq!(
            SessionConfig::default().ttl().unwrap(),
            Duration::hours(24)
        );
        for ttl_seconds in [0, MAX_SESSION_TTL_SECONDS + 1, u64::MAX] {
            assert!(SessionConfig { ttl_seconds }.ttl().is_err());
        }
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"redis": {"url": "redis://127.0.0.1/", "sentinel_enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(config.quota.default_daily_limit, 5);
        assert_eq!(config.session.ttl_seconds, 86_400);
        assert!(config.admin.is_none());
    }

    #[test]
    fn bundled_default_file_loads() {
        let config = Config::load().unwrap();
        assert!(!config.redis.sentinel_enabled);
        assert_eq!(config.quota.default_daily_limit, 5);
        assert_eq!(config.admin.map(|admin| admin.user_id), Some(1));
    }
}
