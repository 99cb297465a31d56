use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("runner.poll_interval_ms must be positive")]
    ZeroPollInterval,

    #[error("server.max_payload_bytes must be positive")]
    ZeroPayloadLimit,

    #[error("downloads.format_selector must not be empty")]
    EmptyFormatSelector,

    #[error("downloads.output_template must contain %(ext)s, got '{template}'")]
    TemplateWithoutExtension { template: String },

    #[error("cleanup.recent_window_secs must be positive")]
    ZeroRecentWindow,

    #[error("cleanup.temp_suffixes must not be empty")]
    NoTempSuffixes,

    #[error("cleanup.temp_suffixes entry '{suffix}' must start with '.'")]
    InvalidTempSuffix { suffix: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_downloads(config)?;
    validate_runner(config)?;
    validate_cleanup(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_payload_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroPayloadLimit);
    }
    Ok(())
}

/// yt-dlp needs the extension placeholder to name merged output
fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    if config.downloads.format_selector.trim().is_empty() {
        return Err(ValidationError::EmptyFormatSelector);
    }

    if !config.downloads.output_template.contains("%(ext)s") {
        return Err(ValidationError::TemplateWithoutExtension {
            template: config.downloads.output_template.clone(),
        });
    }

    Ok(())
}

fn validate_runner(config: &Config) -> Result<(), ValidationError> {
    if config.runner.poll_interval_ms == 0 {
        return Err(ValidationError::ZeroPollInterval);
    }
    Ok(())
}

fn validate_cleanup(config: &Config) -> Result<(), ValidationError> {
    if config.cleanup.recent_window_secs == 0 {
        return Err(ValidationError::ZeroRecentWindow);
    }

    if config.cleanup.temp_suffixes.is_empty() {
        return Err(ValidationError::NoTempSuffixes);
    }

    if let Some(suffix) = config
        .cleanup
        .temp_suffixes
        .iter()
        .find(|suffix| !suffix.starts_with('.') || suffix.len() < 2)
    {
        return Err(ValidationError::InvalidTempSuffix {
            suffix: suffix.clone(),
        });
    }

    Ok(())
}
