use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::fs::File;
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
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    resolve_worker_id(&mut config);
    Ok(config)
}

/// Expand, parse and validate a YAML document. Tilde paths are expanded; the
/// worker id is left as written.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    expand_paths(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded: Vec<String> = env_var_pattern()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    let error_msg = if unexpanded.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             Set them or replace them in the config file with actual values",
            unexpanded.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.storage.install_path = expand_tilde(&config.storage.install_path);
    config.storage.target_path = expand_tilde(&config.storage.target_path);
    if let Some(fuv) = config.storage.fuv_path.as_mut() {
        *fuv = expand_tilde(fuv);
    }
}

fn resolve_worker_id(config: &mut Config) {
    if config.worker_id.is_some() {
        return;
    }
    match hostname::get() {
        Ok(name) => config.worker_id = Some(name.to_string_lossy().into_owned()),
        Err(e) => tracing::warn!(error = %e, "Could not read host name for worker_id"),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if let Some(id) = &config.worker_id {
        if id.trim().is_empty() {
            errors.push("worker_id must not be empty".to_string());
        }
    }

    if config.collector.max_rows_per_cycle == 0 {
        errors.push("collector.max_rows_per_cycle must be greater than 0".to_string());
    }
    if config.remover.max_batch == 0 {
        errors.push("remover.max_batch must be greater than 0".to_string());
    }

    let cleaner = &config.cleaner;
    if cleaner.retention_days == 0 {
        errors.push("cleaner.retention_days must be greater than 0".to_string());
    }
    if cleaner.batch_size == 0 {
        errors.push("cleaner.batch_size must be greater than 0".to_string());
    }
    if cleaner.max_iterations == 0 {
        errors.push("cleaner.max_iterations must be greater than 0".to_string());
    }
    if cleaner.orphan_batch == 0 {
        errors.push("cleaner.orphan_batch must be greater than 0".to_string());
    }

    if config.alerter.poll_interval.is_zero() {
        errors.push("alerter.poll_interval must be greater than 0".to_string());
    }
    if config.backoff.initial.is_zero() || config.backoff.max < config.backoff.initial {
        errors.push("backoff.initial must be non-zero and not exceed backoff.max".to_string());
    }

    if config.range_source.enabled && config.storage.fuv_path.is_none() {
        errors.push("range_source.enabled requires storage.fuv_path".to_string());
    }

    if let Some(endpoint) = &config.notification.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            errors.push(format!(
                "notification.endpoint '{}' must be an http(s) URL",
                endpoint
            ));
        }
        if config.notification.install.trim().is_empty() {
            errors.push("notification.install is required when an endpoint is set".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
