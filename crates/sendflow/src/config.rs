use crate::queue::engine::EngineConfig;
use crate::queue::limits::offset_from_hours;
use crate::queue::retry::AutoRetry;
use crate::queue::template::SenderIdentity;
use std::time::Duration;

/// Typed runtime configuration, loaded from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,

    pub sender_name: String,
    pub sender_email: String,
    pub resend_api_key: Option<String>,
    pub cron_secret: Option<String>,
    pub dry_run: bool,

    pub send_timeout_secs: u64,
    /// 0 disables the stale-processing sweep.
    pub stale_processing_minutes: i64,
    /// 0 means the tick never retries failed items.
    pub auto_retry_max: i32,
    pub utc_offset_hours: i32,
    pub scheduler_enabled: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("SENDFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "sendflow-1".to_string());

        let admin_addr = env_or_fallback("SENDFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("SENDFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let sender_name = env_or_fallback("SENDFLOW_SENDER_NAME", "SENDER_NAME").unwrap_or_default();
        let sender_email =
            env_or_fallback("SENDFLOW_SENDER_EMAIL", "SENDER_EMAIL").unwrap_or_default();

        let resend_api_key = env_or_fallback("SENDFLOW_RESEND_API_KEY", "RESEND_API_KEY");
        let cron_secret = env_or_fallback("SENDFLOW_CRON_SECRET", "CRON_SECRET");
        let dry_run = env_bool("SENDFLOW_DRY_RUN").unwrap_or(false);

        let send_timeout_secs = env_parse("SENDFLOW_SEND_TIMEOUT_SECS", "SEND_TIMEOUT_SECS")
            .unwrap_or(30u64)
            .clamp(1, 300);

        let stale_processing_minutes =
            env_parse("SENDFLOW_STALE_PROCESSING_MINUTES", "STALE_PROCESSING_MINUTES")
                .unwrap_or(30i64)
                .max(0);

        let auto_retry_max = env_parse("SENDFLOW_AUTO_RETRY_MAX", "AUTO_RETRY_MAX")
            .unwrap_or(0i32)
            .max(0);

        let utc_offset_hours: i32 = env_parse("SENDFLOW_UTC_OFFSET_HOURS", "UTC_OFFSET_HOURS")
            .unwrap_or(0);
        if offset_from_hours(utc_offset_hours).is_none() {
            anyhow::bail!("SENDFLOW_UTC_OFFSET_HOURS out of range: {utc_offset_hours}");
        }

        let scheduler_enabled = env_bool("SENDFLOW_SCHEDULER_ENABLED").unwrap_or(true);

        Ok(Self {
            database_url,
            worker_id,
            admin_addr,
            migrate_on_startup,
            sender_name,
            sender_email,
            resend_api_key,
            cron_secret,
            dry_run,
            send_timeout_secs,
            stale_processing_minutes,
            auto_retry_max,
            utc_offset_hours,
            scheduler_enabled,
        })
    }

    pub fn sender(&self) -> SenderIdentity {
        SenderIdentity {
            name: self.sender_name.clone(),
            email: self.sender_email.clone(),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            sender: self.sender(),
            utc_offset: offset_from_hours(self.utc_offset_hours).unwrap_or(defaults.utc_offset),
            auto_retry: (self.auto_retry_max > 0)
                .then(|| AutoRetry::with_max_retries(self.auto_retry_max)),
            send_timeout: self.send_timeout(),
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_addresses_normalize_to_none() {
        assert_eq!(normalize_optional_addr(" off "), None);
        assert_eq!(normalize_optional_addr(""), None);
        assert_eq!(
            normalize_optional_addr("0.0.0.0:3000").as_deref(),
            Some("0.0.0.0:3000")
        );
    }

    #[test]
    fn auto_retry_is_off_unless_configured() {
        let mut cfg = Config {
            database_url: "postgres://x".into(),
            worker_id: "w".into(),
            admin_addr: None,
            migrate_on_startup: false,
            sender_name: "Kim".into(),
            sender_email: "kim@x.test".into(),
            resend_api_key: None,
            cron_secret: None,
            dry_run: true,
            send_timeout_secs: 30,
            stale_processing_minutes: 30,
            auto_retry_max: 0,
            utc_offset_hours: 9,
            scheduler_enabled: true,
        };
        let engine = cfg.engine_config();
        assert!(engine.auto_retry.is_none());
        assert_eq!(engine.utc_offset.local_minus_utc(), 9 * 3600);
        assert_eq!(engine.send_timeout, Duration::from_secs(30));

        cfg.auto_retry_max = 2;
        assert_eq!(cfg.engine_config().auto_retry.map(|r| r.max_retries), Some(2));
    }
}
