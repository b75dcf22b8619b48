use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

use crate::popup::orchestrator::{PopupConfig, TriggerPolicy};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStoreKind {
    Sqlite,
    Supabase {
        url: String,
        anon_key: String,
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierKind {
    Log,
    Resend {
        api_key: String,
    },
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub frontend_url: Option<String>,
    pub secure_cookies: bool,
    pub popup: PopupConfig,
    pub visit_marker_ttl: Duration,
    pub remote_store: RemoteStoreKind,
    pub notifier: NotifierKind,
    pub notify_from: String,
    pub notify_to: String,
    pub timezone: Tz,
    pub site_name: String,
    pub submit_rate_per_minute: u32,
    pub enable_debug_routes: bool,
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: "leadcapture.db".to_string(),
            frontend_url: None,
            secure_cookies: false,
            popup: PopupConfig::default(),
            visit_marker_ttl: crate::repositories::visit_marker::DEFAULT_VISIT_MARKER_TTL,
            remote_store: RemoteStoreKind::Sqlite,
            notifier: NotifierKind::Log,
            notify_from: "Leads <leads@localhost>".to_string(),
            notify_to: "sales@localhost".to_string(),
            timezone: Tz::UTC,
            site_name: "YourIndiaPartner".to_string(),
            submit_rate_per_minute: 5,
            enable_debug_routes: false,
            sentry_dsn: None,
        }
    }
}

/// Source of raw settings. The process environment in production, a map in tests.
struct Vars<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid { name, value }),
        }
    }
}

impl AppConfig {
    /// Reads `.env` when present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_map(vars: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);
        let defaults = Self::default();

        let delay_ms: u64 = vars.parse("POPUP_DELAY_MS", 3000)?;
        let trigger = match vars.get("POPUP_TRIGGER").as_deref() {
            None | Some("timer") => TriggerPolicy::OnTimer {
                delay: Duration::from_millis(delay_ms),
            },
            Some("section") => TriggerPolicy::OnSectionChange,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "POPUP_TRIGGER",
                    value: other.to_string(),
                })
            }
        };
        let timeout_ms: u64 = vars.parse("CHANNEL_TIMEOUT_MS", 10_000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "CHANNEL_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }
        let ttl_hours: u64 = vars.parse("VISIT_MARKER_TTL_HOURS", 24)?;
        let visit_marker_ttl = ttl_hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid {
                name: "VISIT_MARKER_TTL_HOURS",
                value: ttl_hours.to_string(),
            })?;

        let remote_store = match vars.get("REMOTE_STORE").as_deref() {
            None | Some("sqlite") => RemoteStoreKind::Sqlite,
            Some("supabase") => RemoteStoreKind::Supabase {
                url: vars.require("SUPABASE_URL")?,
                anon_key: vars.require("SUPABASE_ANON_KEY")?,
                table: vars
                    .get("SUPABASE_TABLE")
                    .unwrap_or_else(|| "form_submissions".to_string()),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "REMOTE_STORE",
                    value: other.to_string(),
                })
            }
        };

        let notifier = match vars.get("NOTIFIER").as_deref() {
            None | Some("log") => NotifierKind::Log,
            Some("resend") => NotifierKind::Resend {
                api_key: vars.require("RESEND_API_KEY")?,
            },
            Some("smtp") => NotifierKind::Smtp {
                host: vars.require("SMTP_HOST")?,
                port: vars.parse("SMTP_PORT", 587)?,
                username: vars.require("SMTP_USERNAME")?,
                password: vars.require("SMTP_PASSWORD")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "NOTIFIER",
                    value: other.to_string(),
                })
            }
        };
        let (notify_from, notify_to) = match notifier {
            NotifierKind::Log => (
                vars.get("NOTIFY_FROM").unwrap_or(defaults.notify_from),
                vars.get("NOTIFY_TO").unwrap_or(defaults.notify_to),
            ),
            _ => (vars.require("NOTIFY_FROM")?, vars.require("NOTIFY_TO")?),
        };

        let frontend_url = vars.get("FRONTEND_URL");
        if let Some(url) = &frontend_url {
            if axum::http::HeaderValue::from_str(url).is_err() || !url.starts_with("http") {
                return Err(ConfigError::Invalid {
                    name: "FRONTEND_URL",
                    value: url.clone(),
                });
            }
        }

        let submit_rate_per_minute: u32 = vars.parse("SUBMIT_RATE_PER_MINUTE", 5)?;
        if submit_rate_per_minute == 0 {
            return Err(ConfigError::Invalid {
                name: "SUBMIT_RATE_PER_MINUTE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr: vars.parse("BIND_ADDR", defaults.bind_addr)?,
            database_url: vars.get("DATABASE_URL").unwrap_or(defaults.database_url),
            frontend_url,
            secure_cookies: vars.flag("SECURE_COOKIES")?,
            popup: PopupConfig {
                trigger,
                channel_timeout: Duration::from_millis(timeout_ms),
            },
            visit_marker_ttl,
            remote_store,
            notifier,
            notify_from,
            notify_to,
            timezone: vars.parse("NOTIFY_TIMEZONE", Tz::UTC)?,
            site_name: vars.get("SITE_NAME").unwrap_or(defaults.site_name),
            submit_rate_per_minute,
            enable_debug_routes: vars.flag("ENABLE_DEBUG_ROUTES")?,
            sentry_dsn: vars.get("SENTRY_DSN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_environment() {
        let config = AppConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.database_url, "leadcapture.db");
        assert_eq!(
            config.popup.trigger,
            TriggerPolicy::OnTimer {
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(config.popup.channel_timeout, Duration::from_secs(10));
        assert_eq!(config.visit_marker_ttl, Duration::from_secs(86_400));
        assert_eq!(config.remote_store, RemoteStoreKind::Sqlite);
        assert_eq!(config.notifier, NotifierKind::Log);
        assert_eq!(config.timezone, Tz::UTC);
        assert!(!config.enable_debug_routes);
    }

    #[test]
    fn supabase_and_smtp_pick_up_their_settings() {
        let vars = HashMap::from([
            ("REMOTE_STORE", "supabase"),
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("NOTIFIER", "smtp"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "user"),
            ("SMTP_PASSWORD", "pass"),
            ("NOTIFY_FROM", "leads@example.com"),
            ("NOTIFY_TO", "sales@example.com"),
            ("NOTIFY_TIMEZONE", "Asia/Kolkata"),
            ("POPUP_TRIGGER", "section"),
            ("ENABLE_DEBUG_ROUTES", "true"),
        ]);
        let config = AppConfig::from_map(&vars).unwrap();

        assert_eq!(
            config.remote_store,
            RemoteStoreKind::Supabase {
                url: "https://abc.supabase.co".to_string(),
                anon_key: "anon".to_string(),
                table: "form_submissions".to_string(),
            }
        );
        assert!(matches!(config.notifier, NotifierKind::Smtp { port: 587, .. }));
        assert_eq!(config.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(config.popup.trigger, TriggerPolicy::OnSectionChange);
        assert!(config.enable_debug_routes);
    }

    #[test]
    fn bad_values_fail_startup() {
        let bad_trigger = HashMap::from([("POPUP_TRIGGER", "scroll")]);
        assert!(matches!(
            AppConfig::from_map(&bad_trigger),
            Err(ConfigError::Invalid { name: "POPUP_TRIGGER", .. })
        ));

        let bad_tz = HashMap::from([("NOTIFY_TIMEZONE", "Mars/Olympus")]);
        assert!(matches!(
            AppConfig::from_map(&bad_tz),
            Err(ConfigError::Invalid { name: "NOTIFY_TIMEZONE", .. })
        ));

        let missing_key = HashMap::from([("NOTIFIER", "resend")]);
        assert_eq!(
            AppConfig::from_map(&missing_key).unwrap_err(),
            ConfigError::Missing("RESEND_API_KEY")
        );
    }

    #[test]
    fn marker_ttl_too_large_for_seconds_is_rejected() {
        let hours = u64::MAX.to_string();
        let huge_ttl = HashMap::from([("VISIT_MARKER_TTL_HOURS", hours.as_str())]);
        assert_eq!(
            AppConfig::from_map(&huge_ttl).unwrap_err(),
            ConfigError::Invalid {
                name: "VISIT_MARKER_TTL_HOURS",
                value: hours.clone(),
            }
        );

        let week = HashMap::from([("VISIT_MARKER_TTL_HOURS", "168")]);
        assert_eq!(
            AppConfig::from_map(&week).unwrap().visit_marker_ttl,
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }
}
