//! Environment configuration.
//!
//! Values come from the process environment (a `.env` file is loaded by the
//! binary through `dotenvy`). Credentials are not cached here:
//! [`EnvCredentials`] reads them at session-initiation time.

use crate::{GatewayPolicy, PaymentCredentials, Result};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GATEWAY_TOKENS: [&str; 2] = ["onepay.lk", "gateway.onepay"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid { key: &'static str, value: String, expected: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectConfig {
    pub gateway_tokens: Vec<String>,
    pub readiness_poll: Duration,
    pub readiness_timeout: Duration,
    pub watch_window: Duration,
    pub restore_delay: Duration,
    pub payload_global: String,
    pub success_event: String,
    pub failure_event: String,
    /// Whether a stalled session flips `processing` back to false.
    pub reset_processing_on_stall: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            gateway_tokens: DEFAULT_GATEWAY_TOKENS.iter().map(|t| t.to_string()).collect(),
            readiness_poll: Duration::from_millis(100),
            readiness_timeout: Duration::from_secs(30),
            watch_window: Duration::from_secs(10),
            restore_delay: Duration::from_secs(10),
            payload_global: "onePayData".to_string(),
            success_event: "onePaySuccess".to_string(),
            failure_event: "onePayFail".to_string(),
            reset_processing_on_stall: false,
        }
    }
}

impl RedirectConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let gateway_tokens = match lookup("ONEPAY_GATEWAY_TOKENS") {
            Some(raw) => raw.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect(),
            None => defaults.gateway_tokens,
        };
        Ok(Self {
            gateway_tokens,
            readiness_poll: millis(&lookup, "ONEPAY_READINESS_POLL_MS", defaults.readiness_poll)?,
            readiness_timeout: millis(&lookup, "ONEPAY_READINESS_TIMEOUT_MS", defaults.readiness_timeout)?,
            watch_window: millis(&lookup, "ONEPAY_WATCH_WINDOW_MS", defaults.watch_window)?,
            restore_delay: millis(&lookup, "ONEPAY_RESTORE_DELAY_MS", defaults.restore_delay)?,
            payload_global: lookup("ONEPAY_PAYLOAD_GLOBAL").unwrap_or(defaults.payload_global),
            success_event: lookup("ONEPAY_SUCCESS_EVENT").unwrap_or(defaults.success_event),
            failure_event: lookup("ONEPAY_FAILURE_EVENT").unwrap_or(defaults.failure_event),
            reset_processing_on_stall: flag(&lookup, "ONEPAY_RESET_PROCESSING_ON_STALL", defaults.reset_processing_on_stall)?,
        })
    }

    pub fn gateway_policy(&self) -> Result<GatewayPolicy> {
        Ok(GatewayPolicy::new(self.gateway_tokens.iter().cloned())?)
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: Duration) -> std::result::Result<Duration, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { key, value: raw, expected: "a whole number of milliseconds" }),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: bool) -> std::result::Result<bool, ConfigError> {
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid { key, value: other.to_string(), expected: "a boolean" }),
    }
}

/// Where a session gets its merchant credentials from.
pub trait CredentialSource: Send + Sync {
    fn load(&self) -> Result<PaymentCredentials>;
}

impl CredentialSource for PaymentCredentials {
    fn load(&self) -> Result<PaymentCredentials> { Ok(self.clone()) }
}

/// Reads `ONEPAY_APP_ID`, `ONEPAY_HASH_TOKEN` and `ONEPAY_APP_TOKEN` on every load.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn load(&self) -> Result<PaymentCredentials> {
        PaymentCredentials::from_parts(
            std::env::var("ONEPAY_APP_ID").ok(),
            std::env::var("ONEPAY_HASH_TOKEN").ok(),
            std::env::var("ONEPAY_APP_TOKEN").ok(),
        )
    }
}

/// Settings for the callback receiver binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub port: u16,
    pub nats_url: Option<String>,
    pub success_page: String,
    pub failure_page: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { port: 8083, nats_url: None, success_page: "/checkout/success".to_string(), failure_page: "/checkout/failed".to_string() }
    }
}

impl ServiceConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key: "PORT", value: raw, expected: "a port number" })?,
            None => defaults.port,
        };
        Ok(Self {
            port,
            nats_url: lookup("NATS_URL").filter(|url| !url.trim().is_empty()),
            success_page: lookup("ONEPAY_SUCCESS_PAGE").unwrap_or(defaults.success_page),
            failure_page: lookup("ONEPAY_FAILURE_PAGE").unwrap_or(defaults.failure_page),
        })
    }
}
