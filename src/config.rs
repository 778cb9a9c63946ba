use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::QuotaPolicy;
use crate::model::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Server settings, read once at startup from `ROOMBOOK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Days of past bookings kept before the housekeeper prunes them.
    pub retention_days: u32,
    pub quota: QuotaPolicy,
    pub members_file: PathBuf,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults, set keys
    /// must parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = QuotaPolicy::default();
        let exempt_roles = match lookup("ROOMBOOK_EXEMPT_ROLES") {
            Some(raw) => parse_roles(&raw)?,
            None => defaults.exempt_roles,
        };
        let password = lookup("ROOMBOOK_PASSWORD").unwrap_or_else(|| "roombook".into());
        if password.is_empty() {
            return Err(ConfigError::Empty { var: "ROOMBOOK_PASSWORD" });
        }

        Ok(Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "ROOMBOOK_PORT")?.unwrap_or(5433),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password,
            max_connections: parsed(&lookup, "ROOMBOOK_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            retention_days: parsed(&lookup, "ROOMBOOK_RETENTION_DAYS")?.unwrap_or(90),
            quota: QuotaPolicy {
                ceiling: parsed(&lookup, "ROOMBOOK_QUOTA_CEILING")?.unwrap_or(defaults.ceiling),
                exempt_roles,
            },
            members_file: lookup("ROOMBOOK_MEMBERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./members.json")),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT")?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

/// `"0,1"` → {Role(0), Role(1)}. An empty string exempts nobody.
fn parse_roles(raw: &str) -> Result<BTreeSet<Role>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u8>().map(Role).map_err(|_| ConfigError::Invalid {
                var: "ROOMBOOK_EXEMPT_ROLES",
                value: raw.to_string(),
            })
        })
        .collect()
}
