use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
];

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_explorer_config(config)?;
    validate_http_config(config)?;
    validate_log_level(config)?;
    validate_log_format(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

/// Checks that `base_url` is an absolute http(s) URL.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] describing the problem.
pub fn validate_base_url(base_url: &str) -> Result<url::Url, ConfigError> {
    let parsed = url::Url::parse(base_url.trim())
        .map_err(|err| validation_err(format!("invalid base_url '{base_url}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "base_url '{base_url}' must use http or https"
        )));
    }
    if parsed.host_str().is_none() {
        return Err(validation_err(format!("base_url '{base_url}' has no host")));
    }
    Ok(parsed)
}

fn validate_explorer_config(config: &AppConfig) -> Result<(), ConfigError> {
    let explorer = &config.explorer;
    validate_base_url(&explorer.base_url)?;
    if explorer.preset.model.trim().is_empty() {
        return Err(validation_err("explorer.preset.model cannot be empty"));
    }
    if let Some(api_key) = &explorer.api_key {
        if api_key.trim().is_empty() {
            return Err(validation_err(
                "explorer.api_key cannot be empty when set",
            ));
        }
    }
    Ok(())
}

fn validate_http_config(config: &AppConfig) -> Result<(), ConfigError> {
    let http = &config.http;
    if http.connect_timeout_secs == 0 {
        return Err(validation_err(
            "http.connect_timeout_secs must be greater than 0",
        ));
    }
    if http.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "http.pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(proxy) = &http.proxy {
        url::Url::parse(proxy)
            .map_err(|err| validation_err(format!("invalid http.proxy '{proxy}': {err}")))?;
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "invalid log_level '{}', expected one of {VALID_LOG_LEVELS:?}",
            config.features.log_level
        )));
    }
    Ok(())
}

fn validate_log_format(config: &AppConfig) -> Result<(), ConfigError> {
    let format = config.features.log_format.to_lowercase();
    if !VALID_LOG_FORMATS.contains(&format.as_str()) {
        return Err(validation_err(format!(
            "invalid log_format '{}', expected one of {VALID_LOG_FORMATS:?}",
            config.features.log_format
        )));
    }
    Ok(())
}
