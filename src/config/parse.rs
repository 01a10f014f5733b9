use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use crate::source::timestamp::TimestampExtractor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string)
}

/// Parse and validate a config from YAML text
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    if let Some(directory) = config.sink.directory.as_mut() {
        *directory = expand_tilde(directory);
    }
    if config.source.store == StoreType::Local {
        config.source.bucket = expand_tilde(Path::new(&config.source.bucket))
            .to_string_lossy()
            .into_owned();
    }

    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml_string);
    if unexpanded.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded.join(", ")
    )))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.source.bucket.trim().is_empty() {
        errors.push("source.bucket must not be empty".to_string());
    }

    if config.sink.log_group.trim().is_empty() {
        errors.push("sink.log_group must not be empty".to_string());
    }
    if config.sink.stream_prefix.trim().is_empty() {
        errors.push("sink.stream_prefix must not be empty".to_string());
    }
    match config.sink.sink_type {
        SinkType::Http if config.sink.endpoint.is_none() => {
            errors.push("sink.endpoint is required for the http sink".to_string());
        }
        SinkType::File if config.sink.directory.is_none() => {
            errors.push("sink.directory is required for the file sink".to_string());
        }
        _ => {}
    }

    if config.batch.max_bytes == 0 {
        errors.push("batch.max_bytes must be greater than 0".to_string());
    }
    if config.batch.max_count == Some(0) {
        errors.push("batch.max_count must be greater than 0".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if config.retry.initial_backoff > config.retry.max_backoff {
        errors.push("retry.initial_backoff must not exceed retry.max_backoff".to_string());
    }

    if config.concurrency.workers == 0 {
        errors.push("concurrency.workers must be at least 1".to_string());
    }

    if let TimestampConfig::Record { pattern, format } = &config.routing.timestamp {
        if let Err(e) = TimestampExtractor::new(pattern, format) {
            errors.push(format!("routing.timestamp: {}", e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
