use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "VIDQUEUE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/vidqueue.toml";
const ENV_PREFIX: &str = "VIDQUEUE";
const ENV_SEPARATOR: &str = "__";

/// Older deployments set the output directory through this variable
const LEGACY_DOWNLOAD_DIR_VAR: &str = "DEFAULT_DOWNLOAD_DIR";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables
/// 5. Legacy `DEFAULT_DOWNLOAD_DIR` (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_path(config_path)
}

/// Same as [`load`] for an explicit file, minus the `.env` lookup
pub fn load_from_path(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut config = load_from_sources(config_path)?;
    apply_legacy_env(&mut config, env::var(LEGACY_DOWNLOAD_DIR_VAR).ok());
    Ok(config)
}

fn apply_legacy_env(config: &mut Config, download_dir: Option<String>) {
    if let Some(dir) = download_dir.filter(|dir| !dir.trim().is_empty()) {
        tracing::debug!(dir = %dir, var = LEGACY_DOWNLOAD_DIR_VAR, "Output directory overridden");
        config.downloads.output_dir = PathBuf::from(dir);
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // VIDQUEUE__DOWNLOADS__OUTPUT_DIR -> downloads.output_dir
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
