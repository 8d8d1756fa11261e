// Config validation
// Fail fast at startup with actionable errors instead of misbehaving mid-cycle.

use crate::config::types::{MonitorConfig, MonitorError, Result, MAX_CONCURRENT_CHECKS};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config at startup. Errors are fatal, warnings are logged.
pub fn validate_config(config: &MonitorConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_timing(config, &mut result);
    validate_fanout(config, &mut result);
    validate_paths(config, &mut result);

    for warning in &result.warnings {
        log::warn!("Config: {}", warning);
    }

    if !result.is_valid() {
        return Err(MonitorError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_timing(config: &MonitorConfig, result: &mut ValidationResult) {
    if config.poll_interval_secs == 0 {
        result.add_error("poll_interval_secs cannot be zero".to_string());
    }
    if config.check_timeout_secs == 0 {
        result.add_error("check_timeout_secs cannot be zero".to_string());
    }
    if config.kill_grace_ms == 0 {
        result.add_error("kill_grace_ms cannot be zero".to_string());
    }

    if config.check_timeout_secs > config.poll_interval_secs && config.poll_interval_secs > 0 {
        result.add_warning(format!(
            "check_timeout_secs ({}) exceeds poll_interval_secs ({}); a hung mount will delay the next cycle",
            config.check_timeout_secs, config.poll_interval_secs
        ));
    }
}

fn validate_fanout(config: &MonitorConfig, result: &mut ValidationResult) {
    if config.max_concurrent_checks == 0 {
        result.add_error("max_concurrent_checks must be at least 1".to_string());
    } else if config.max_concurrent_checks > MAX_CONCURRENT_CHECKS {
        result.add_error(format!(
            "max_concurrent_checks {} exceeds the limit of {}",
            config.max_concurrent_checks, MAX_CONCURRENT_CHECKS
        ));
    }
}

fn validate_paths(config: &MonitorConfig, result: &mut ValidationResult) {
    for path in &config.ignore_paths {
        if !path.is_absolute() {
            result.add_error(format!(
                "ignore_paths entry must be absolute: {}",
                path.display()
            ));
        }
    }

    if let Some(path) = &config.metrics_textfile {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                result.add_warning(format!(
                    "metrics_textfile directory {} does not exist",
                    parent.display()
                ));
            }
            _ => {}
        }
    }
}
