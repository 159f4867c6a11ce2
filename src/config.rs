//! Configuration types.
//!
//! Everything is built from environment variables at startup, with the
//! same convention throughout: a missing gating variable disables the
//! subsystem (`from_env` returns `None`), a malformed value falls back
//! to the default rather than aborting.

use std::path::Path;

use serde::Deserialize;

use crate::cron;
use crate::error::ConfigError;
use crate::rules::Rule;
use crate::store::Group;

// ── Account ─────────────────────────────────────────────────────────

/// The mailbox this engine automates.
#[derive(Debug, Clone)]
pub struct Account {
    /// Stable identifier used to key stored state.
    pub id: String,
    /// The mailbox address, used to derive message direction.
    pub email: String,
    /// When set, every satisfied rule fires instead of only the first.
    pub multi_rule_selection: bool,
    /// Optional label applied to messages the engine has picked up.
    pub processing_label: Option<String>,
}

impl Account {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            multi_rule_selection: false,
            processing_label: None,
        }
    }

    pub fn with_multi_rule_selection(mut self) -> Self {
        self.multi_rule_selection = true;
        self
    }

    /// Build the account from environment variables.
    /// Returns `Err` if `MAILFLOW_ACCOUNT_EMAIL` is not set; there is no
    /// useful engine without a mailbox.
    pub fn from_env() -> Result<Self, ConfigError> {
        let email = std::env::var("MAILFLOW_ACCOUNT_EMAIL")
            .map_err(|_| ConfigError::MissingEnvVar("MAILFLOW_ACCOUNT_EMAIL".to_string()))?;

        let id = std::env::var("MAILFLOW_ACCOUNT_ID").unwrap_or_else(|_| "primary".to_string());

        let multi_rule_selection = std::env::var("MAILFLOW_MULTI_RULE_SELECTION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let processing_label = std::env::var("MAILFLOW_PROCESSING_LABEL")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            id,
            email,
            multi_rule_selection,
            processing_label,
        })
    }
}

// ── Server ──────────────────────────────────────────────────────────

/// Webhook server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("MAILFLOW_BIND_ADDR").unwrap_or_else(|_| Self::default().bind_addr);
        Self { bind_addr }
    }
}

// ── Background jobs ─────────────────────────────────────────────────

/// Scheduled job configuration.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Cron expression for digest assembly, e.g. `0 17 * * 1-5`.
    pub digest_schedule: Option<String>,
    /// Scheduler wake interval in seconds.
    pub tick_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            digest_schedule: None,
            tick_secs: 30,
        }
    }
}

impl JobsConfig {
    /// Build config from environment variables. A digest schedule that
    /// fails cron validation is rejected rather than silently dropped.
    pub fn from_env() -> Result<Self, ConfigError> {
        let digest_schedule = match std::env::var("MAILFLOW_DIGEST_SCHEDULE") {
            Ok(expr) if !expr.trim().is_empty() => {
                cron::validate(&expr).map_err(|e| ConfigError::InvalidValue {
                    key: "MAILFLOW_DIGEST_SCHEDULE".to_string(),
                    message: e.to_string(),
                })?;
                Some(expr)
            }
            _ => None,
        };

        let tick_secs = std::env::var("MAILFLOW_JOBS_TICK_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| Self::default().tick_secs);

        Ok(Self {
            digest_schedule,
            tick_secs,
        })
    }
}

// ── Seed file ───────────────────────────────────────────────────────

/// Rules and sender groups loaded into the store at startup.
#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// Load a JSON seed file of rules and groups.
pub fn load_seed_file(path: &Path) -> Result<SeedFile, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))
}
