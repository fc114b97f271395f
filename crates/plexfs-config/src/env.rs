use regex::Regex;
use std::env;

use crate::ConfigError;

/// Substitute `${VAR_NAME}` placeholders with environment variable
/// values. Unset variables are collected so the error names all of them
/// at once rather than one per run.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let placeholder = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    let mut missing: Vec<String> = Vec::new();
    let expanded = placeholder.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        env::var(name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            String::new()
        })
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::MissingEnvVars(missing))
    }
}
