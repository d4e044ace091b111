use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use entity_db::value::row_from_json;
use entity_db::{
    DbConnConfig, DbHandle, EntityError, EntityRegistry, EntityRepository, Outcome, ReadParams,
    Row, SetOptions, Sorters,
};
use filter_core::Filter;
use mimalloc::MiMalloc;
use runtime::{AppConfig, CliArgs};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Expand a sqlite DSN into an absolute-path DSN using a base directory.
/// - Keeps in-memory DSNs as-is.
/// - Normalizes backslashes into forward slashes (important on Windows).
fn absolutize_sqlite_dsn(dsn: &str, base_dir: &Path) -> Result<String> {
    if dsn.eq_ignore_ascii_case("sqlite::memory:") || dsn.eq_ignore_ascii_case("sqlite://:memory:")
    {
        return Ok("sqlite::memory:".to_string());
    }
    let Some(db_path) = dsn.strip_prefix("sqlite://") else {
        return Ok(dsn.to_string());
    };

    let (path_str, query) = match db_path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (db_path, None),
    };

    let mut p = PathBuf::from(path_str);
    if p.as_os_str().is_empty() {
        return Err(anyhow!("Empty SQLite path in DSN"));
    }
    if p.is_relative() {
        p = base_dir.join(p);
    }

    let mut out = String::from("sqlite://");
    out.push_str(&p.to_string_lossy().replace('\\', "/"));
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    Ok(out)
}

/// Entity CLI - drive entities declared in a YAML configuration
#[derive(Parser)]
#[command(name = "entity-cli")]
#[command(about = "Entity CLI - read and write entities declared in a YAML configuration")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database DSN (overrides config)
    #[arg(long)]
    dsn: Option<String>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration and report which tables exist
    Check,
    /// Print the effective configuration as YAML
    PrintConfig,
    /// Compile a JSON filter into SQL and bind values
    CompileFilter {
        /// Filter JSON: rule tree or `{"field": value}` shorthand
        #[arg(long)]
        filters: String,
    },
    /// Create the table and unique indexes of an entity (all entities when omitted)
    InitDb { entity: Option<String> },
    /// Read one page of rows
    Read {
        entity: String,
        /// Filter JSON
        #[arg(long)]
        filters: Option<String>,
        /// Sorters JSON, e.g. `{"name": "ASC"}`
        #[arg(long)]
        sorters: Option<String>,
        #[arg(long)]
        page: Option<u64>,
        #[arg(long)]
        page_size: Option<u64>,
    },
    /// Count rows matching a filter
    Count {
        entity: String,
        /// Filter JSON
        #[arg(long)]
        filters: Option<String>,
    },
    /// Insert or update one row
    Save {
        entity: String,
        /// Row JSON
        #[arg(long)]
        data: String,
    },
    /// Delete the row matching a key
    Delete {
        entity: String,
        /// Key JSON, e.g. `{"id": 1}`
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        dsn: cli.dsn.clone(),
        verbose: cli.verbose,
    };

    // Load configuration (normalized home_dir is applied inside)
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    runtime::logging::init_logging_from_config(&logging_config, Path::new(&config.home_dir));
    tracing::debug!(entities = config.entities.len(), "configuration loaded");

    let success = match cli.command {
        Commands::PrintConfig => {
            print!("{}", config.to_yaml()?);
            true
        }
        Commands::CompileFilter { filters } => {
            print_json(&compile_filter(&filters)?)?;
            true
        }
        command => {
            let registry = open_registry(&config).await?;
            run_command(&registry, command).await?
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Connect and build every configured entity.
async fn open_registry(config: &AppConfig) -> Result<EntityRegistry> {
    let mut db_config: DbConnConfig = config.database_or_default();
    db_config.dsn = absolutize_sqlite_dsn(db_config.dsn.trim(), Path::new(&config.home_dir))?;

    tracing::info!(dsn = %db_config.dsn, "connecting to database");
    let db = DbHandle::from_config(&db_config)
        .await
        .with_context(|| format!("Failed to connect to {}", db_config.dsn))?;
    tracing::info!(engine = ?db.engine(), "connected");

    EntityRegistry::from_config(db, &config.entities).context("Invalid entity configuration")
}

/// Runs a database command; false when the command reported a failed outcome.
async fn run_command(registry: &EntityRegistry, command: Commands) -> Result<bool> {
    match command {
        Commands::Check => {
            let mut tables = serde_json::Map::new();
            for (name, repository) in registry.iter() {
                tables.insert(name.to_string(), json!(repository.check_db().await?));
            }
            print_json(&json!({
                "engine": format!("{:?}", registry.db().engine()),
                "entities": tables,
            }))?;
            Ok(true)
        }
        Commands::InitDb { entity: None } => report(registry.init_all().await?),
        Commands::InitDb {
            entity: Some(entity),
        } => {
            let repository = registry.get(&entity)?;
            let mut outcome = Outcome::ok(json!([]));
            if repository.init_db().await? {
                outcome.set_data(json!([entity]));
            } else {
                let indexes = repository.init_db_indexes().await?;
                for warning in indexes.warnings {
                    outcome.add_warning(warning);
                }
            }
            report(outcome)
        }
        Commands::Read {
            entity,
            filters,
            sorters,
            page,
            page_size,
        } => {
            let repository = registry.get(&entity)?;
            let mut params = ReadParams::default();
            if let Some(filters) = filters {
                params.filters = parse_json("--filters", &filters)?;
            }
            if let Some(sorters) = sorters {
                params.sorters = serde_json::from_value::<Sorters>(parse_json("--sorters", &sorters)?)
                    .context("--sorters must map fields to ASC or DESC")?;
            }
            params.page = page;
            params.page_size = page_size;

            let page = repository
                .read_all(&repository.query_params(params))
                .await?
                .map_items(|row| entity_db::value::row_to_json(&row));
            print_json(&serde_json::to_value(page)?)?;
            Ok(true)
        }
        Commands::Count { entity, filters } => {
            let repository = registry.get(&entity)?;
            let mut params = ReadParams::default();
            if let Some(filters) = filters {
                params.filters = parse_json("--filters", &filters)?;
            }
            let total = repository.read_count(&repository.query_params(params)).await?;
            print_json(&json!({ "totalRecords": total }))?;
            Ok(true)
        }
        Commands::Save { entity, data } => {
            let repository = registry.get(&entity)?;
            let data = parse_row("--data", &data)?;
            report(save(repository, data).await?)
        }
        Commands::Delete { entity, key } => {
            let repository = registry.get(&entity)?;
            let key = parse_row("--key", &key)?;
            let outcome = match repository.find_one_by(&key).await? {
                Some(mut found) => found.delete(true).await,
                None => Outcome::error(
                    "_delete",
                    EntityError::NothingToDelete.to_string(),
                    JsonValue::Null,
                ),
            };
            report(outcome)
        }
        Commands::PrintConfig | Commands::CompileFilter { .. } => {
            bail!("command does not use the database")
        }
    }
}

/// Update the stored row named by the identity in `data`, insert otherwise.
async fn save(repository: &EntityRepository, data: Row) -> Result<Outcome> {
    let keys = repository.schema().identity(false);
    let identity: Row = keys
        .iter()
        .filter_map(|id| data.get(*id).map(|v| (id.to_string(), v.clone())))
        .collect();

    let complete = !keys.is_empty() && identity.len() == keys.len();
    let existing = if complete && !identity.values().any(|v| v.is_blank()) {
        repository.find_one_by(&identity).await?
    } else {
        None
    };

    let mut entity = match existing {
        Some(mut stored) => {
            for (name, value) in data {
                stored.assign(&name, value, SetOptions::default());
            }
            stored
        }
        None => {
            let mut fresh = repository.entity();
            for (name, value) in data {
                fresh.assign(&name, value, SetOptions::default());
            }
            fresh
        }
    };
    Ok(entity.save().await)
}

fn compile_filter(filters: &str) -> Result<JsonValue> {
    let filter = Filter::from_json(&parse_json("--filters", filters)?)?;
    let compiled = filter.compile()?;
    Ok(json!({
        "filter": filter.to_value(),
        "sql": compiled.sql,
        "values": compiled.values,
    }))
}

fn report(outcome: Outcome) -> Result<bool> {
    print_json(&outcome.to_value())?;
    Ok(outcome.is_success())
}

fn parse_json(flag: &str, raw: &str) -> Result<JsonValue> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn parse_row(flag: &str, raw: &str) -> Result<Row> {
    row_from_json(&parse_json(flag, raw)?).with_context(|| format!("{flag} must be a JSON object"))
}

fn print_json(value: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_sqlite_dsn() {
        let base = Path::new("/srv/app");
        assert_eq!(
            absolutize_sqlite_dsn("sqlite::memory:", base).unwrap(),
            "sqlite::memory:"
        );
        assert_eq!(
            absolutize_sqlite_dsn("sqlite://data/app.db?wal=true", base).unwrap(),
            "sqlite:///srv/app/data/app.db?wal=true"
        );
        assert_eq!(
            absolutize_sqlite_dsn("sqlite:///tmp/app.db", base).unwrap(),
            "sqlite:///tmp/app.db"
        );
        assert_eq!(
            absolutize_sqlite_dsn("postgres://u@h/db", base).unwrap(),
            "postgres://u@h/db"
        );
        assert!(absolutize_sqlite_dsn("sqlite://", base).is_err());
    }

    #[test]
    fn test_compile_filter_shorthand() {
        let out = compile_filter(r#"{"name": "Ada"}"#).unwrap();
        assert!(out["sql"].as_str().unwrap().contains("name"));
        assert_eq!(out["values"], json!(["Ada"]));
    }

    #[test]
    fn test_parse_row_rejects_arrays() {
        assert!(parse_row("--data", "[1, 2]").is_err());
        assert!(parse_row("--data", "{not json").is_err());
        assert_eq!(parse_row("--data", r#"{"id": 1}"#).unwrap().len(), 1);
    }
}
