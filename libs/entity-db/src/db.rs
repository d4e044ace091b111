//! Connection handle: one sqlx pool per engine, exposed as a sea-orm connection.

use std::collections::HashMap;
use std::time::Duration;

#[cfg(feature = "mysql")]
use sqlx::mysql::MySqlPoolOptions;
#[cfg(feature = "pg")]
use sqlx::postgres::PgPoolOptions;
#[cfg(feature = "sqlite")]
use sqlx::sqlite::SqlitePoolOptions;

use sea_orm::DatabaseConnection;
#[cfg(feature = "mysql")]
use sea_orm::SqlxMySqlConnector;
#[cfg(feature = "pg")]
use sea_orm::SqlxPostgresConnector;
#[cfg(feature = "sqlite")]
use sea_orm::SqlxSqliteConnector;

use thiserror::Error;

use crate::config::{DbConnConfig, PoolCfg};

/// Result type of the connection layer.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for the DB handle.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("Feature not enabled: {0}")]
    FeatureDisabled(&'static str),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    MySql,
    Sqlite,
}

/// Pool knobs; each driver applies the subset it supports.
#[derive(Clone, Debug)]
pub struct ConnectOpts {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    pub acquire_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub test_before_acquire: bool,
    /// For SQLite file DSNs, create parent directories if missing.
    pub create_sqlite_dirs: bool,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            max_conns: Some(10),
            min_conns: None,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            max_lifetime: None,
            test_before_acquire: false,
            create_sqlite_dirs: true,
        }
    }
}

impl From<&PoolCfg> for ConnectOpts {
    fn from(cfg: &PoolCfg) -> Self {
        let defaults = ConnectOpts::default();
        Self {
            max_conns: cfg.max_conns.or(defaults.max_conns),
            min_conns: cfg.min_conns,
            acquire_timeout: cfg.acquire_timeout.or(defaults.acquire_timeout),
            idle_timeout: cfg.idle_timeout,
            max_lifetime: cfg.max_lifetime,
            test_before_acquire: cfg.test_before_acquire.unwrap_or(false),
            create_sqlite_dirs: true,
        }
    }
}

macro_rules! apply_pool_opts {
    ($builder:expr, $opts:expr) => {{
        let mut o = $builder;
        if let Some(n) = $opts.max_conns {
            o = o.max_connections(n);
        }
        if let Some(n) = $opts.min_conns {
            o = o.min_connections(n);
        }
        if let Some(t) = $opts.acquire_timeout {
            o = o.acquire_timeout(t);
        }
        if let Some(t) = $opts.idle_timeout {
            o = o.idle_timeout(t);
        }
        if let Some(t) = $opts.max_lifetime {
            o = o.max_lifetime(t);
        }
        if $opts.test_before_acquire {
            o = o.test_before_acquire(true);
        }
        o
    }};
}

/// Main handle.
#[derive(Debug, Clone)]
pub struct DbHandle {
    engine: DbEngine,
    dsn: String,
    sea: DatabaseConnection,
}

const DEFAULT_SQLITE_BUSY_TIMEOUT: i32 = 5000;

impl DbHandle {
    /// Detect engine by DSN scheme.
    pub fn detect(dsn: &str) -> Result<DbEngine> {
        let s = dsn.trim_start();
        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(DbEngine::Postgres)
        } else if s.starts_with("mysql://") {
            Ok(DbEngine::MySql)
        } else if s.starts_with("sqlite:") {
            Ok(DbEngine::Sqlite)
        } else {
            Err(DbError::UnknownDsn(dsn.to_string()))
        }
    }

    /// Connect using the `database` config section.
    pub async fn from_config(cfg: &DbConnConfig) -> Result<Self> {
        Self::connect(&cfg.dsn, ConnectOpts::from(&cfg.pool)).await
    }

    /// Connect and build handle.
    pub async fn connect(dsn: &str, opts: ConnectOpts) -> Result<Self> {
        let engine = Self::detect(dsn)?;
        match engine {
            #[cfg(feature = "pg")]
            DbEngine::Postgres => {
                let pool = apply_pool_opts!(PgPoolOptions::new(), opts)
                    .connect(dsn)
                    .await?;
                tracing::debug!(engine = ?engine, "database pool ready");
                Ok(Self {
                    engine,
                    dsn: dsn.to_string(),
                    sea: SqlxPostgresConnector::from_sqlx_postgres_pool(pool),
                })
            }
            #[cfg(feature = "mysql")]
            DbEngine::MySql => {
                let pool = apply_pool_opts!(MySqlPoolOptions::new(), opts)
                    .connect(dsn)
                    .await?;
                tracing::debug!(engine = ?engine, "database pool ready");
                Ok(Self {
                    engine,
                    dsn: dsn.to_string(),
                    sea: SqlxMySqlConnector::from_sqlx_mysql_pool(pool),
                })
            }
            #[cfg(feature = "sqlite")]
            DbEngine::Sqlite => {
                let dsn = prepare_sqlite_path(dsn, opts.create_sqlite_dirs)?;
                let dsn_pragmas = parse_sqlite_pragmas_from_dsn(&dsn);
                let clean_dsn = remove_sqlite_pragmas_from_dsn(&dsn);
                let in_memory = is_memory_dsn(&clean_dsn);

                let mut opts = opts;
                if in_memory {
                    // Every connection to :memory: opens its own database.
                    opts.max_conns = Some(1);
                    opts.min_conns = Some(1);
                    opts.idle_timeout = None;
                    opts.max_lifetime = None;
                }

                let mut o = apply_pool_opts!(SqlitePoolOptions::new(), opts);
                if in_memory {
                    o = o.idle_timeout(None).max_lifetime(None);
                }
                o = o.after_connect(move |conn, _meta| {
                    let pragmas = dsn_pragmas.clone();
                    Box::pin(async move {
                        let journal = pragmas
                            .get("journal_mode")
                            .or_else(|| pragmas.get("wal"))
                            .cloned()
                            .unwrap_or_else(|| {
                                let mode = if in_memory { "DELETE" } else { "WAL" };
                                mode.to_string()
                            });
                        sqlx::query(&format!("PRAGMA journal_mode = {journal}"))
                            .execute(&mut *conn)
                            .await?;

                        let sync = pragmas
                            .get("synchronous")
                            .cloned()
                            .unwrap_or_else(|| "NORMAL".to_string());
                        sqlx::query(&format!("PRAGMA synchronous = {sync}"))
                            .execute(&mut *conn)
                            .await?;

                        if !in_memory {
                            if let Some(timeout) = pragmas.get("busy_timeout") {
                                sqlx::query(&format!("PRAGMA busy_timeout = {timeout}"))
                                    .execute(&mut *conn)
                                    .await?;
                            } else {
                                sqlx::query("PRAGMA busy_timeout = ?")
                                    .bind(DEFAULT_SQLITE_BUSY_TIMEOUT)
                                    .execute(&mut *conn)
                                    .await?;
                            }
                        }
                        Ok(())
                    })
                });

                let pool = o.connect(&clean_dsn).await?;
                tracing::debug!(engine = ?engine, in_memory, "database pool ready");
                Ok(Self {
                    engine,
                    dsn: clean_dsn,
                    sea: SqlxSqliteConnector::from_sqlx_sqlite_pool(pool),
                })
            }
            #[cfg(not(feature = "pg"))]
            DbEngine::Postgres => Err(DbError::FeatureDisabled("PostgreSQL feature not enabled")),
            #[cfg(not(feature = "mysql"))]
            DbEngine::MySql => Err(DbError::FeatureDisabled("MySQL feature not enabled")),
            #[cfg(not(feature = "sqlite"))]
            DbEngine::Sqlite => Err(DbError::FeatureDisabled("SQLite feature not enabled")),
        }
    }

    /// Graceful close of the underlying pool.
    pub async fn close(self) -> Result<()> {
        self.sea.close().await?;
        Ok(())
    }

    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    /// DSN actually used for the connection (SQLite pragmas stripped).
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// SeaORM connection (clone; cheap handle).
    pub fn sea(&self) -> DatabaseConnection {
        self.sea.clone()
    }

    pub fn seaorm(&self) -> &DatabaseConnection {
        &self.sea
    }
}

// ===================== helpers =====================

fn is_memory_dsn(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

#[cfg(feature = "sqlite")]
fn prepare_sqlite_path(dsn: &str, create_dirs: bool) -> Result<String> {
    if !create_dirs || is_memory_dsn(dsn) {
        return Ok(dsn.to_string());
    }

    let raw = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);

    if !raw.starts_with("file:") {
        let path = raw.split('?').next().unwrap_or(raw);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    // sqlx opens existing files only unless asked to create them.
    let has_mode = dsn
        .split_once('?')
        .is_some_and(|(_, q)| q.split('&').any(|p| p.to_ascii_lowercase().starts_with("mode=")));
    if has_mode {
        Ok(dsn.to_string())
    } else if dsn.contains('?') {
        Ok(format!("{dsn}&mode=rwc"))
    } else {
        Ok(format!("{dsn}?mode=rwc"))
    }
}

const SQLITE_PRAGMA_PARAMS: &[&str] = &["wal", "synchronous", "busy_timeout", "journal_mode"];

/// Remove SQLite PRAGMA parameters from the DSN; sqlx does not understand them.
fn remove_sqlite_pragmas_from_dsn(dsn: &str) -> String {
    let Some((base, query)) = dsn.split_once('?') else {
        return dsn.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default().to_lowercase();
            !pair.is_empty() && !SQLITE_PRAGMA_PARAMS.contains(&key.as_str())
        })
        .collect();
    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    }
}

/// Parse whitelisted PRAGMA settings from the DSN query string.
/// Invalid values are logged and ignored.
fn parse_sqlite_pragmas_from_dsn(dsn: &str) -> HashMap<String, String> {
    let mut pragmas = HashMap::new();
    let Some((_, query)) = dsn.split_once('?') else {
        return pragmas;
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let key_lower = key.to_lowercase();
        let validated = match key_lower.as_str() {
            "wal" => validate_wal_pragma(&value),
            "synchronous" => validate_synchronous_pragma(&value),
            "busy_timeout" => validate_busy_timeout_pragma(&value).map(|v| v.to_string()),
            "journal_mode" => validate_journal_mode_pragma(&value),
            _ => {
                tracing::debug!("Unknown SQLite parameter '{key}={value}' in DSN, ignoring");
                continue;
            }
        };
        match validated {
            Some(v) => {
                pragmas.insert(key_lower, v);
            }
            None => {
                tracing::warn!("Invalid '{key_lower}' PRAGMA value '{value}' in DSN, ignoring");
            }
        }
    }

    pragmas
}

/// "true"/"1" → WAL, "false"/"0" → DELETE.
fn validate_wal_pragma(value: &str) -> Option<String> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Some("WAL".to_string()),
        "false" | "0" => Some("DELETE".to_string()),
        _ => None,
    }
}

fn validate_synchronous_pragma(value: &str) -> Option<String> {
    match value.to_uppercase().as_str() {
        "OFF" | "NORMAL" | "FULL" | "EXTRA" => Some(value.to_uppercase()),
        _ => None,
    }
}

fn validate_busy_timeout_pragma(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().filter(|&timeout| timeout >= 0)
}

fn validate_journal_mode_pragma(value: &str) -> Option<String> {
    match value.to_uppercase().as_str() {
        "DELETE" | "WAL" | "MEMORY" | "TRUNCATE" | "PERSIST" | "OFF" => Some(value.to_uppercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ConnectionTrait;

    #[test]
    fn test_backend_detection() {
        assert_eq!(DbHandle::detect("sqlite://test.db").unwrap(), DbEngine::Sqlite);
        assert_eq!(DbHandle::detect("sqlite::memory:").unwrap(), DbEngine::Sqlite);
        assert_eq!(
            DbHandle::detect("postgres://localhost/test").unwrap(),
            DbEngine::Postgres
        );
        assert_eq!(
            DbHandle::detect("mysql://localhost/test").unwrap(),
            DbEngine::MySql
        );
        assert!(matches!(
            DbHandle::detect("unknown://test"),
            Err(DbError::UnknownDsn(_))
        ));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_memory_connection_keeps_state() -> Result<()> {
        let db = DbHandle::connect("sqlite::memory:?synchronous=FULL", ConnectOpts::default())
            .await?;
        assert_eq!(db.engine(), DbEngine::Sqlite);
        assert_eq!(db.dsn(), "sqlite::memory:");

        let conn = db.sea();
        conn.execute_unprepared("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;
        conn.execute_unprepared("INSERT INTO t (name) VALUES ('a')")
            .await?;
        // A second statement must see the same in-memory database.
        let row = conn
            .query_one(sea_orm::Statement::from_string(
                conn.get_database_backend(),
                "SELECT COUNT(1) AS n FROM t",
            ))
            .await?
            .expect("one row");
        let n: i64 = row.try_get("", "n")?;
        assert_eq!(n, 1);
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_file_is_created_with_parent_dirs() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("nested/app.db");
        let dsn = format!("sqlite://{}?wal=true", path.to_string_lossy().replace('\\', "/"));

        let db = DbHandle::connect(&dsn, ConnectOpts::default()).await?;
        assert!(db.dsn().ends_with("?mode=rwc"));
        db.close().await?;
        assert!(path.exists());
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_path_keeps_explicit_mode() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dsn = format!("sqlite://{}/a.db?mode=ro", tmp.path().to_string_lossy());
        assert_eq!(prepare_sqlite_path(&dsn, true)?, dsn);
        assert_eq!(prepare_sqlite_path("sqlite::memory:", true)?, "sqlite::memory:");
        Ok(())
    }

    #[test]
    fn test_connect_opts_from_pool_cfg() {
        let cfg = PoolCfg {
            max_conns: Some(3),
            idle_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let opts = ConnectOpts::from(&cfg);
        assert_eq!(opts.max_conns, Some(3));
        assert_eq!(opts.idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(opts.acquire_timeout, Some(Duration::from_secs(30)));
        assert!(!opts.test_before_acquire);
    }

    #[test]
    fn test_pragma_validation_valid_values() {
        let p = parse_sqlite_pragmas_from_dsn(
            "sqlite://test.db?wal=true&synchronous=full&busy_timeout=0&journal_mode=delete",
        );
        assert_eq!(p.get("wal"), Some(&"WAL".to_string()));
        assert_eq!(p.get("synchronous"), Some(&"FULL".to_string()));
        assert_eq!(p.get("busy_timeout"), Some(&"0".to_string()));
        assert_eq!(p.get("journal_mode"), Some(&"DELETE".to_string()));
    }

    #[test]
    fn test_pragma_validation_invalid_values() {
        let p = parse_sqlite_pragmas_from_dsn(
            "sqlite://test.db?wal=2&synchronous=yes&busy_timeout=-1&journal_mode=true&foo=bar",
        );
        assert!(p.is_empty());
    }

    #[test]
    fn test_pragma_case_insensitive_matching() {
        let p = parse_sqlite_pragmas_from_dsn("sqlite://test.db?WAL=true&Synchronous=Normal");
        assert_eq!(p.get("wal"), Some(&"WAL".to_string()));
        assert_eq!(p.get("synchronous"), Some(&"NORMAL".to_string()));
    }

    #[test]
    fn test_remove_sqlite_pragmas_from_dsn() {
        let clean = remove_sqlite_pragmas_from_dsn(
            "sqlite://test.db?wal=true&synchronous=NORMAL&mode=rwc&BUSY_TIMEOUT=5000&cache=shared",
        );
        assert_eq!(clean, "sqlite://test.db?mode=rwc&cache=shared");

        assert_eq!(
            remove_sqlite_pragmas_from_dsn("sqlite://test.db?wal=true&busy_timeout=5000"),
            "sqlite://test.db"
        );
        assert_eq!(
            remove_sqlite_pragmas_from_dsn("sqlite://test.db"),
            "sqlite://test.db"
        );
        assert_eq!(
            remove_sqlite_pragmas_from_dsn("sqlite::memory:?journal_mode=WAL"),
            "sqlite::memory:"
        );
    }
}
