//! Database configuration types, deserialized directly from Figment configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection config of the `database` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DbConnConfig {
    /// Full DSN: `sqlite://…`, `sqlite::memory:`, `postgres://…` or `mysql://…`.
    pub dsn: String,

    /// Connection pool overrides.
    #[serde(default)]
    pub pool: PoolCfg,
}

impl Default for DbConnConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite::memory:".to_string(),
            pool: PoolCfg::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PoolCfg {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    #[serde(with = "humantime_serde", default)]
    pub acquire_timeout: Option<Duration>,
    #[serde(with = "humantime_serde", default)]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde", default)]
    pub max_lifetime: Option<Duration>,
    pub test_before_acquire: Option<bool>,
}
