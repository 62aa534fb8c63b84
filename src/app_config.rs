use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::assembler::CONVERSATION_WINDOW;
use crate::identity::GOOGLE_TOKENINFO_URL;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // --- Server ---
    pub host: String,
    pub port: u16,
    pub cookie_secure: bool,

    // --- Identity ---
    pub google_client_id: Option<String>,
    pub google_tokeninfo_url: String,
    pub dev_sign_in: bool,

    // --- Store ---
    pub conversation_window: usize,
    pub confirm_delay: Duration,
    pub confirm_timeout: Duration,
    pub max_message_len: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // dotenv belongs HERE, nowhere else
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("PORT"), "PORT", 3001)?,
            cookie_secure: parse_flag(get("COOKIE_SECURE"), "COOKIE_SECURE")?,

            google_client_id: get("GOOGLE_CLIENT_ID"),
            google_tokeninfo_url: get("GOOGLE_TOKENINFO_URL")
                .unwrap_or_else(|| GOOGLE_TOKENINFO_URL.into()),
            dev_sign_in: parse_flag(get("DEV_SIGN_IN"), "DEV_SIGN_IN")?,

            conversation_window: parse_or(get("CONVERSATION_WINDOW"), "CONVERSATION_WINDOW", CONVERSATION_WINDOW)?,
            confirm_delay: Duration::from_millis(parse_or(
                get("STORE_CONFIRM_DELAY_MS"),
                "STORE_CONFIRM_DELAY_MS",
                25,
            )?),
            confirm_timeout: Duration::from_millis(parse_or(
                get("REPLY_CONFIRM_TIMEOUT_MS"),
                "REPLY_CONFIRM_TIMEOUT_MS",
                10_000,
            )?),
            max_message_len: parse_or(get("MAX_MESSAGE_LEN"), "MAX_MESSAGE_LEN", 2000)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}

fn parse_flag(raw: Option<String>, key: &str) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("{key} has invalid value {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:3001");
        assert_eq!(config.conversation_window, 25);
        assert_eq!(config.google_tokeninfo_url, GOOGLE_TOKENINFO_URL);
        assert!(config.google_client_id.is_none());
        assert!(!config.dev_sign_in);
        assert!(!config.cookie_secure);
        assert_eq!(config.confirm_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("GOOGLE_CLIENT_ID", " abc.apps.googleusercontent.com "),
            ("DEV_SIGN_IN", "Yes"),
            ("STORE_CONFIRM_DELAY_MS", "0"),
            ("CONVERSATION_WINDOW", "10"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.google_client_id.as_deref(), Some("abc.apps.googleusercontent.com"));
        assert!(config.dev_sign_in);
        assert_eq!(config.confirm_delay, Duration::ZERO);
        assert_eq!(config.conversation_window, 10);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config(&[("PORT", "  "), ("GOOGLE_CLIENT_ID", "")]).unwrap();

        assert_eq!(config.port, 3001);
        assert!(config.google_client_id.is_none());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[("PORT", "eighty")]).is_err());
        assert!(config(&[("DEV_SIGN_IN", "maybe")]).is_err());
        assert!(config(&[("MAX_MESSAGE_LEN", "-1")]).is_err());
    }
}
