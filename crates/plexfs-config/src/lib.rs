//! Configuration for the plexfs union filesystem.
//!
//! A configuration names an ordered list of branches (underlying
//! directories with an access mode and a free-space threshold), the
//! synthetic control-entry path, and the branch-selection policy assigned
//! to each filesystem operation.

mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::default_policy;
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Configuration has no branches")]
    NoBranches,

    #[error("Duplicate branch path: {0}")]
    DuplicateBranchPath(String),

    #[error("Invalid branch path '{0}': {1}")]
    InvalidBranchPath(String, String),

    #[error("Policy '{policy}' is not valid for {category} operation '{op}'")]
    PolicyCategoryMismatch {
        op: String,
        policy: String,
        category: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UnionConfig {
    /// Parse a union configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: UnionConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a union configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
branches:
  - path: /mnt/disk1
  - path: /mnt/disk2
    mode: no_create
"#;

        let config = UnionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.branches.len(), 2);
        assert_eq!(config.branches[0].path, "/mnt/disk1");
        assert_eq!(config.branches[0].mode, BranchMode::ReadWrite);
        assert_eq!(config.branches[1].mode, BranchMode::NoCreate);
        assert_eq!(config.control_file, "/.plexfs");
        assert_eq!(config.min_free_space, 0);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
branches:
  - path: /mnt/disk1
    min_free_space: 1073741824
  - path: /mnt/archive
    mode: read_only
min_free_space: 4294967296
control_file: /.ctl
move_on_enospc: true
policies:
  create: existing-path
  getattr: newest
"#;

        let config = UnionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.branches[0].min_free_space, Some(1 << 30));
        assert_eq!(config.branches[1].mode, BranchMode::ReadOnly);
        assert_eq!(config.min_free_space, 4 << 30);
        assert_eq!(config.control_file, "/.ctl");
        assert!(config.move_on_enospc);
        assert_eq!(config.policies[&FuseOp::Create], Policy::ExistingPath);
        assert_eq!(config.policies[&FuseOp::Getattr], Policy::Newest);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("PLEXFS_TEST_POOL", "/srv/pool");

        let yaml = r#"
branches:
  - path: ${PLEXFS_TEST_POOL}/disk1
"#;

        let config = UnionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.branches[0].path, "/srv/pool/disk1");
    }

    #[test]
    fn test_bad_policy_name_rejected_at_parse() {
        let yaml = r#"
branches:
  - path: /mnt/disk1
policies:
  create: frobnicate
"#;

        assert!(matches!(
            UnionConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }
}
