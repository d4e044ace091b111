//! Application runtime: layered configuration and logging bootstrap.

pub mod config;
pub mod home_dir;
pub mod logging;

pub use config::{AppConfig, CliArgs, LoggingConfig, Section};
pub use logging::init_logging_from_config;
