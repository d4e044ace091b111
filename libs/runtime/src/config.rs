use anyhow::{bail, Context, Result};
use entity_db::{DbConnConfig, EntitySchemaConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::home_dir::resolve_home_dir;

/// Subdirectory of the user's home used when `home_dir` is not configured.
pub const DEFAULT_SUBDIR: &str = ".entity-repository";

/// Application configuration: where the data lives, how to log, and which
/// entities to drive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base directory for relative log paths; normalized to an absolute path.
    #[serde(default)]
    pub home_dir: String,
    /// Database connection (optional).
    pub database: Option<DbConnConfig>,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Directory with one YAML file per entity (optional).
    #[serde(default)]
    pub entities_dir: Option<String>,
    /// Entity schemas: entity name → declarative schema.
    #[serde(default)]
    pub entities: IndexMap<String, EntitySchemaConfig>,
}

/// Logging configuration - maps target prefixes to their logging settings.
/// Key "default" is the catch-all for events that match no explicit target.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/entity.log"
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "warn".to_string(),
            file: String::new(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            database: Some(DbConnConfig::default()),
            logging: Some(default_logging_config()),
            entities_dir: None,
            entities: IndexMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        if !config_path.as_ref().is_file() {
            bail!("Config file {} not found", config_path.as_ref().display());
        }

        // Optional sections stay None unless YAML or ENV provide them.
        let base = AppConfig {
            home_dir: String::new(),
            database: None,
            logging: None,
            entities_dir: None,
            entities: IndexMap::new(),
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // APP__DATABASE__DSN=postgres://... maps to database.dsn
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .context("Failed to extract config from figment")?;

        config.normalize_home_dir().context("Failed to resolve home_dir")?;

        if let Some(dir) = config.entities_dir.clone() {
            merge_entity_files(&mut config.entities, resolve_relative(&dir, config_path.as_ref()))?;
        }

        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                c.normalize_home_dir()
                    .context("Failed to resolve home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(dsn) = &args.dsn {
            let database = self.database.get_or_insert_with(DbConnConfig::default);
            database.dsn = dsn.clone();
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(),
                1 => "info".to_string(),
                2 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }

    /// Connection settings, defaulting to an in-memory SQLite database.
    pub fn database_or_default(&self) -> DbConnConfig {
        self.database.clone().unwrap_or_default()
    }

    fn normalize_home_dir(&mut self) -> Result<()> {
        let configured = if self.home_dir.trim().is_empty() {
            None
        } else {
            Some(self.home_dir.clone())
        };
        let resolved = resolve_home_dir(configured, DEFAULT_SUBDIR, true)?;
        self.home_dir = resolved.to_string_lossy().to_string();
        Ok(())
    }
}

/// Command line arguments that override the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub dsn: Option<String>,
    pub verbose: u8,
}

/// Relative `entities_dir` values are taken from the config file's directory.
fn resolve_relative(dir: &str, config_path: &Path) -> PathBuf {
    let p = Path::new(dir);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match config_path.parent() {
        Some(parent) => parent.join(p),
        None => p.to_path_buf(),
    }
}

/// Entities declared inline win over files of the same name.
fn merge_entity_files(
    entities: &mut IndexMap<String, EntitySchemaConfig>,
    dir: impl AsRef<Path>,
) -> Result<()> {
    use std::fs;
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();

    for path in paths {
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        if name.is_empty() || entities.contains_key(&name) {
            continue;
        }
        let raw = fs::read_to_string(&path)?;
        let schema: EntitySchemaConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid entity file {}", path.display()))?;
        entities.insert(name, schema);
    }
    Ok(())
}
