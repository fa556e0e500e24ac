use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }

    if config.output_directory == config.temp_directory {
        return Err(invalid(
            "output_directory and temp_directory must be different",
        ));
    }

    let mastering = &config.mastering;
    if mastering.tool_path.as_os_str().is_empty() {
        return Err(invalid("mastering.tool_path must not be empty"));
    }
    if mastering.timeout_seconds == 0 || mastering.probe_timeout_seconds == 0 {
        return Err(invalid("mastering timeouts must be greater than zero"));
    }
    if !mastering.target_loudness.is_finite() {
        return Err(invalid("mastering.target_loudness must be a finite number"));
    }

    let eq = &config.eq;
    if eq.ffmpeg_path.as_os_str().is_empty() {
        return Err(invalid("eq.ffmpeg_path must not be empty"));
    }
    if eq.timeout_seconds == 0 {
        return Err(invalid("eq.timeout_seconds must be greater than zero"));
    }
    if !(eq.min_gain_db < eq.max_gain_db) {
        return Err(invalid(format!(
            "eq.min_gain_db ({}) must be less than eq.max_gain_db ({})",
            eq.min_gain_db, eq.max_gain_db
        )));
    }

    Ok(())
}
