use std::collections::HashSet;

use crate::types::UnionConfig;
use crate::ConfigError;

impl UnionConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.branches.is_empty() {
            errors.push(ConfigError::NoBranches);
        }

        // Check for duplicate branch paths
        let mut seen_paths = HashSet::new();
        for branch in &self.branches {
            if !seen_paths.insert(&branch.path) {
                errors.push(ConfigError::DuplicateBranchPath(branch.path.clone()));
            }
        }

        // Branch paths must be absolute
        for branch in &self.branches {
            if !branch.path.starts_with('/') {
                errors.push(ConfigError::InvalidBranchPath(
                    branch.path.clone(),
                    "branch path must be absolute".to_string(),
                ));
            }
        }

        // The control entry is a union-relative path
        if !self.control_file.starts_with('/') {
            errors.push(ConfigError::InvalidConfig(format!(
                "control_file '{}' must start with '/'",
                self.control_file
            )));
        }

        // Assigned policies must match their operation's category
        for (op, policy) in &self.policies {
            if !policy.valid_for(op.category()) {
                errors.push(ConfigError::PolicyCategoryMismatch {
                    op: op.name().to_string(),
                    policy: policy.name().to_string(),
                    category: op.category().name().to_string(),
                });
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        let mut errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }
}
