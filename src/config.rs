use std::collections::HashSet;

use anyhow::Context;

use crate::models::{ApprovalPolicy, Identity};

/// Default validity window: four weeks.
pub const DEFAULT_APPROVAL_TTL_SECS: u64 = 28 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. When absent the in-memory store is used.
    pub database_url: Option<String>,
    /// Shared secret the authentication proxy presents in `x-api-key`.
    pub api_key: Option<String>,
    /// Identities allowed to act on behalf of other identities.
    pub admin_users: HashSet<Identity>,
    /// Distinct approvers needed before an approval grants access.
    /// Set via GATEKEEPER_REQUIRED_APPROVERS. Default: 1.
    pub required_approvers: usize,
    /// Validity window in seconds, counted from request creation.
    /// Set via GATEKEEPER_APPROVAL_TTL_SECS. Default: 28 days.
    pub approval_ttl_secs: u64,
    /// Comma-separated list of webhook URLs notified of approval events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            api_key: None,
            admin_users: HashSet::new(),
            required_approvers: 1,
            approval_ttl_secs: DEFAULT_APPROVAL_TTL_SECS,
            webhook_urls: Vec::new(),
            webhook_secret: None,
        }
    }
}

impl Config {
    pub fn approval_policy(&self) -> ApprovalPolicy {
        let ttl = i64::try_from(self.approval_ttl_secs).unwrap_or(i64::MAX);
        ApprovalPolicy::new(self.required_approvers, chrono::Duration::seconds(ttl))
    }

    /// Build a config from a variable lookup. `load` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let list = |key: &str| -> Vec<String> {
            get(key)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        };

        let admin_users = list("GATEKEEPER_ADMIN_USERS")
            .into_iter()
            .map(|name| {
                Identity::new(name.clone())
                    .with_context(|| format!("GATEKEEPER_ADMIN_USERS contains an invalid identity: {:?}", name))
            })
            .collect::<anyhow::Result<HashSet<_>>>()?;

        let required_approvers = match non_empty("GATEKEEPER_REQUIRED_APPROVERS") {
            Some(v) => v
                .parse::<usize>()
                .context("GATEKEEPER_REQUIRED_APPROVERS must be a positive integer")?,
            None => 1,
        };
        if required_approvers == 0 {
            anyhow::bail!("GATEKEEPER_REQUIRED_APPROVERS must be at least 1");
        }

        let approval_ttl_secs = match non_empty("GATEKEEPER_APPROVAL_TTL_SECS") {
            Some(v) => v
                .parse::<u64>()
                .context("GATEKEEPER_APPROVAL_TTL_SECS must be a number of seconds")?,
            None => DEFAULT_APPROVAL_TTL_SECS,
        };
        if approval_ttl_secs == 0 {
            anyhow::bail!("GATEKEEPER_APPROVAL_TTL_SECS must be greater than zero");
        }

        let port = match non_empty("GATEKEEPER_PORT") {
            Some(v) => v
                .parse::<u16>()
                .context("GATEKEEPER_PORT must be a port number")?,
            None => 8080,
        };

        Ok(Config {
            port,
            database_url: non_empty("DATABASE_URL"),
            api_key: non_empty("GATEKEEPER_API_KEY"),
            admin_users,
            required_approvers,
            approval_ttl_secs,
            webhook_urls: list("GATEKEEPER_WEBHOOK_URLS"),
            webhook_secret: non_empty("GATEKEEPER_WEBHOOK_SECRET"),
        })
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_lookup(|key| std::env::var(key).ok())
}
