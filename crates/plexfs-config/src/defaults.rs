use crate::types::{Category, FuseOp, Policy, UnionConfig};

/// Default policy for operations whose assignment is absent from the
/// configuration file.
pub fn default_policy(category: Category) -> Policy {
    match category {
        Category::Search => Policy::FirstFound,
        Category::Create => Policy::MostFreeSpace,
        Category::Action => Policy::AllFound,
    }
}

impl UnionConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        for op in FuseOp::ALL {
            self.policies
                .entry(op)
                .or_insert_with(|| default_policy(op.category()));
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> UnionConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }

    /// The policy currently assigned to `op`, falling back to the
    /// category default when unassigned.
    pub fn policy_for(&self, op: FuseOp) -> Policy {
        self.policies
            .get(&op)
            .copied()
            .unwrap_or_else(|| default_policy(op.category()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchConfig, BranchMode};

    #[test]
    fn test_effective_fills_every_op() {
        let config = UnionConfig {
            branches: vec![BranchConfig {
                path: "/mnt/a".into(),
                mode: BranchMode::ReadWrite,
                min_free_space: None,
            }],
            ..Default::default()
        };
        let effective = config.effective();
        for op in FuseOp::ALL {
            let policy = effective.policies.get(&op).copied().unwrap();
            assert!(policy.valid_for(op.category()));
        }
    }

    #[test]
    fn test_explicit_assignment_survives_defaults() {
        let mut config = UnionConfig::default();
        config.policies.insert(FuseOp::Create, Policy::Random);
        let effective = config.effective();
        assert_eq!(effective.policies[&FuseOp::Create], Policy::Random);
        assert_eq!(effective.policies[&FuseOp::Mkdir], Policy::MostFreeSpace);
    }

    #[test]
    fn test_policy_for_falls_back() {
        let config = UnionConfig::default();
        assert_eq!(config.policy_for(FuseOp::Getattr), Policy::FirstFound);
        assert_eq!(config.policy_for(FuseOp::Unlink), Policy::AllFound);
    }
}
