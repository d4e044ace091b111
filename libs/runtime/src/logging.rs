use crate::config::{LoggingConfig, Section};
use std::{
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::Level;
use tracing_subscriber::{filter::FilterFn, fmt};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

const DEFAULT_MAX_SIZE_MB: u64 = 100;
const DEFAULT_MAX_BACKUPS: usize = 5;

// -------- level helpers --------
fn parse_tracing_level(s: &str) -> Option<tracing::Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == prefix or target starts with "prefix::"
fn matches_target_prefix(target: &str, prefix: &str) -> bool {
    target == prefix
        || (target.starts_with(prefix) && target[prefix.len()..].starts_with("::"))
}

type DefaultFilter = FilterFn<Box<dyn Fn(&tracing::Metadata<'_>) -> bool + Send + Sync + 'static>>;

/// Events of targets without an explicit section, up to `max_level`.
fn default_filter(explicit: &[String], max_level: Level) -> DefaultFilter {
    let explicit = explicit.to_vec();
    FilterFn::new(Box::new(move |meta: &tracing::Metadata<'_>| {
        let t = meta.target();
        !explicit.iter().any(|p| matches_target_prefix(t, p)) && meta.level() <= &max_level
    }))
}

// -------- rotating writer for files --------
#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("log writer poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("log writer poisoned"))?
            .flush()
    }
}

/// A writer that drops everything when no file is routed.
struct RoutedWriter(Option<RotWriter>);

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Route events to files by target prefix; unmatched targets go to the default file.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<RotWriter>,
    by_prefix: Vec<(String, RotWriter)>,
}

impl FileRouter {
    fn resolve_for(&self, target: &str) -> Option<RotWriter> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_target_prefix(target, prefix))
            .map(|(_, w)| w.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriter(self.resolve_for(meta.target()))
    }
}

// -------- config split --------

struct Sections<'a> {
    default: Option<&'a Section>,
    explicit: Vec<(String, &'a Section)>,
}

impl<'a> Sections<'a> {
    fn from_config(cfg: &'a LoggingConfig) -> Self {
        let mut explicit = cfg
            .iter()
            .filter(|(k, _)| k.as_str() != "default")
            .map(|(k, v)| (k.clone(), v))
            .collect::<Vec<_>>();
        // Longest prefix first so nested targets win over their parents.
        explicit.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            default: cfg.get("default"),
            explicit,
        }
    }

    fn names(&self) -> Vec<String> {
        self.explicit.iter().map(|(n, _)| n.clone()).collect()
    }
}

// -------- path resolution helpers --------

/// Absolute paths are kept as-is; relative paths are joined with `base_dir`.
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn create_rotating_writer_at_path(
    log_path: &Path,
    max_bytes: usize,
    max_backups: usize,
) -> std::io::Result<RotWriter> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(max_backups)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

fn section_writer(name: &str, section: &Section, base_dir: &Path) -> Option<RotWriter> {
    if section.file.trim().is_empty() {
        return None;
    }

    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) * 1024 * 1024;
    let max_backups = section.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS);
    let log_path = resolve_log_path(&section.file, base_dir);

    match create_rotating_writer_at_path(&log_path, max_bytes as usize, max_backups) {
        Ok(writer) => Some(writer),
        Err(e) => {
            eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                log_path.to_string_lossy(),
                e
            );
            None
        }
    }
}

fn build_file_router(sections: &Sections, base_dir: &Path) -> FileRouter {
    let mut router = FileRouter {
        default: sections
            .default
            .and_then(|s| section_writer("default", s, base_dir)),
        by_prefix: Vec::new(),
    };
    for (name, section) in &sections.explicit {
        if let Some(writer) = section_writer(name, section, base_dir) {
            router.by_prefix.push((name.clone(), writer));
        }
    }
    router
}

fn build_console_targets(sections: &Sections) -> tracing_subscriber::filter::Targets {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::filter::Targets;

    let mut targets = Targets::new().with_default(LevelFilter::OFF);
    for (name, section) in &sections.explicit {
        if let Some(level) = parse_tracing_level(&section.console_level) {
            targets = targets.with_target(name.clone(), LevelFilter::from_level(level));
        }
    }
    targets
}

fn build_file_targets(sections: &Sections) -> tracing_subscriber::filter::Targets {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::filter::Targets;

    let mut targets = Targets::new().with_default(LevelFilter::OFF);
    for (name, section) in &sections.explicit {
        if section.file.trim().is_empty() {
            continue;
        }
        if let Some(level) = parse_tracing_level(&section.file_level) {
            targets = targets.with_target(name.clone(), LevelFilter::from_level(level));
        }
    }
    targets
}

// -------- public init --------

/// Initialize logging from a configuration.
/// - `cfg`: the `logging` section
/// - `base_dir`: base directory for relative log file paths (usually `home_dir`)
///
/// Console output goes to stderr; files receive JSON lines.
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    use tracing_subscriber::{layer::SubscriberExt, prelude::*, Registry};

    // Bridge `log` → `tracing` before installing the subscriber
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        init_default_logging();
        return;
    }

    let sections = Sections::from_config(cfg);
    let names = sections.names();
    let router = build_file_router(&sections, base_dir);
    let ansi = std::io::stderr().is_terminal();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(build_console_targets(&sections));

    let console_default = sections
        .default
        .and_then(|s| parse_tracing_level(&s.console_level))
        .map(|level| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_filter(default_filter(&names, level))
        });

    let file_layers = (!router.is_empty()).then(|| {
        let explicit = fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router.clone())
            .with_filter(build_file_targets(&sections));

        let default = router
            .default
            .as_ref()
            .and(sections.default)
            .and_then(|s| parse_tracing_level(&s.file_level))
            .map(|level| {
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(router.clone())
                    .with_filter(default_filter(&names, level))
            });
        explicit.and_then(default)
    });

    let _ = Registry::default()
        .with(console_layer)
        .with(console_default)
        .with(file_layers)
        .try_init();
}

fn init_default_logging() {
    let _ = fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::WARN)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .try_init();
}

// =================== tests ===================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_logging_config;
    use std::fs;
    use tempfile::tempdir;

    fn section(console: &str, file: &str, file_level: &str) -> Section {
        Section {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn test_logging_level_parsing() {
        assert_eq!(parse_tracing_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_tracing_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_tracing_level("Info"), Some(Level::INFO));
        assert_eq!(parse_tracing_level("warn"), Some(Level::WARN));
        assert_eq!(parse_tracing_level("ERROR"), Some(Level::ERROR));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(parse_tracing_level("none"), None);
        assert_eq!(parse_tracing_level("invalid"), Some(Level::INFO));
    }

    #[test]
    fn test_target_prefix_matching() {
        assert!(matches_target_prefix("entity_db", "entity_db"));
        assert!(matches_target_prefix("entity_db::repository", "entity_db"));
        assert!(!matches_target_prefix("entity_dbx", "entity_db"));
        assert!(!matches_target_prefix("filter_core", "entity_db"));
    }

    #[test]
    fn test_sections_split_default_and_explicit() {
        let mut cfg = default_logging_config();
        cfg.insert("entity_db".into(), section("info", "logs/db.log", "debug"));
        cfg.insert("entity_db::repository".into(), section("debug", "", "debug"));

        let sections = Sections::from_config(&cfg);
        assert!(sections.default.is_some());
        assert_eq!(
            sections.names(),
            vec!["entity_db::repository".to_string(), "entity_db".to_string()]
        );
    }

    #[test]
    fn test_file_router_prefers_longest_prefix() {
        let tmp = tempdir().unwrap();
        let mut cfg = LoggingConfig::new();
        cfg.insert("default".into(), section("warn", "logs/all.log", "info"));
        cfg.insert("entity_db".into(), section("info", "logs/db.log", "debug"));
        cfg.insert("entity_db::ddl".into(), section("info", "logs/ddl.log", "debug"));

        let sections = Sections::from_config(&cfg);
        let router = build_file_router(&sections, tmp.path());
        assert!(!router.is_empty());

        let ddl = router.resolve_for("entity_db::ddl").unwrap();
        let db = router.resolve_for("entity_db::entity").unwrap();
        let other = router.resolve_for("entity_cli").unwrap();
        assert!(!Arc::ptr_eq(&ddl.0, &db.0));
        assert!(Arc::ptr_eq(&other.0, &router.default.as_ref().unwrap().0));
        assert!(tmp.path().join("logs").is_dir());
    }

    #[test]
    fn test_sections_without_file_route_nowhere() {
        let tmp = tempdir().unwrap();
        let cfg = default_logging_config();
        let sections = Sections::from_config(&cfg);
        let router = build_file_router(&sections, tmp.path());
        assert!(router.is_empty());
        let mut sink = RoutedWriter(router.resolve_for("anything"));
        assert_eq!(sink.write(b"dropped").unwrap(), 7);
    }

    #[test]
    fn test_file_paths_resolved_against_home_dir() {
        let tmp = tempdir().unwrap();
        let resolved = resolve_log_path("logs/test.log", tmp.path());
        assert!(resolved.starts_with(tmp.path()));
        assert!(resolved.ends_with("logs/test.log"));

        let absolute = tmp.path().join("abs.log");
        assert_eq!(
            resolve_log_path(&absolute.to_string_lossy(), Path::new("/ignored")),
            absolute
        );
    }

    #[test]
    fn test_rotating_writer_creates_parent_and_writes() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("nested/dir/app.log");

        let mut writer = create_rotating_writer_at_path(&p, 128 * 1024, 2).unwrap();
        writer.write_all(b"{\"msg\":\"hello\"}\n").unwrap();
        writer.flush().unwrap();

        let written = fs::read_to_string(&p).unwrap();
        assert!(written.contains("hello"));
    }
}
