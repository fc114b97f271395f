//! The extended-attribute control protocol.
//!
//! Live configuration is exposed as attributes on one synthetic control
//! entry: `user.plexfs.<field>` addresses a scalar field,
//! `user.plexfs.category.<name>` the de-duplicated policy set of a
//! category, and `user.plexfs.func.<op>` the policy assigned to one
//! operation. Ordinary union paths additionally answer the diagnostic
//! names `basepath`, `relpath`, `fullpath`, and `allpaths`.

use plexfs_config::{
    branches_from_string, branches_to_string, Category, FuseOp, Policy, UnionConfig,
};

use crate::error::XattrError;

/// Namespace prefix for every attribute plexfs itself answers.
pub const XATTR_PREFIX: &str = "user.plexfs.";

/// Result of an attribute read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrOut {
    /// Size probe: the byte length a full read would copy.
    Size(usize),
    /// The value itself.
    Data(Vec<u8>),
}

/// Apply the read contract to a rendered value: zero capacity probes the
/// length, a short buffer is `Range`, otherwise the value is returned
/// whole.
pub fn read_value(value: &[u8], count: usize) -> Result<XattrOut, XattrError> {
    if count == 0 {
        return Ok(XattrOut::Size(value.len()));
    }
    if count < value.len() {
        return Err(XattrError::Range);
    }
    Ok(XattrOut::Data(value.to_vec()))
}

/// Diagnostic attributes answered for ordinary union paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagAttr {
    /// The chosen branch's base path.
    BasePath,
    /// The union-relative path.
    RelPath,
    /// The fully resolved path on the chosen branch.
    FullPath,
    /// Every resolved path that exists, NUL-joined.
    AllPaths,
}

/// Parse a diagnostic attribute name; `None` if it is not one of ours.
pub fn parse_diag(attrname: &str) -> Option<DiagAttr> {
    match attrname.strip_prefix(XATTR_PREFIX)? {
        "basepath" => Some(DiagAttr::BasePath),
        "relpath" => Some(DiagAttr::RelPath),
        "fullpath" => Some(DiagAttr::FullPath),
        "allpaths" => Some(DiagAttr::AllPaths),
        _ => None,
    }
}

/// Whether the attribute name falls under the plexfs namespace.
pub fn in_namespace(attrname: &str) -> bool {
    attrname.starts_with(XATTR_PREFIX)
}

/// Read a control-entry attribute.
pub fn control_getxattr(
    config: &UnionConfig,
    attrname: &str,
    count: usize,
) -> Result<XattrOut, XattrError> {
    let value = control_value(config, attrname).ok_or(XattrError::NoAttr)?;
    read_value(value.as_bytes(), count)
}

fn control_value(config: &UnionConfig, attrname: &str) -> Option<String> {
    let rest = attrname.strip_prefix(XATTR_PREFIX)?;
    let parts: Vec<&str> = rest.split('.').collect();

    match parts.as_slice() {
        [field] => match *field {
            "branches" => Some(branches_to_string(&config.branches)),
            "minfreespace" => Some(config.min_free_space.to_string()),
            "moveonenospc" => Some(bool_str(config.move_on_enospc).to_string()),
            "policies" => Some(
                Policy::ALL
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            "version" => Some(env!("CARGO_PKG_VERSION").to_string()),
            "pid" => Some(std::process::id().to_string()),
            _ => None,
        },
        ["category", name] => {
            let category = Category::from_name(name)?;
            Some(category_policies(config, category).join(","))
        }
        ["func", name] => {
            let op = FuseOp::from_name(name)?;
            Some(config.policy_for(op).name().to_string())
        }
        _ => None,
    }
}

/// The sorted, de-duplicated set of policy names currently assigned to
/// operations of `category`.
fn category_policies(config: &UnionConfig, category: Category) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FuseOp::ALL
        .into_iter()
        .filter(|op| op.category() == category)
        .map(|op| config.policy_for(op).name())
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// Write a control-entry attribute, mutating `config` in place.
///
/// The caller is responsible for re-validating the configuration and
/// swapping the live branch snapshot afterwards.
pub fn control_setxattr(
    config: &mut UnionConfig,
    attrname: &str,
    value: &[u8],
) -> Result<(), XattrError> {
    let rest = attrname
        .strip_prefix(XATTR_PREFIX)
        .ok_or(XattrError::NoAttr)?;
    let value = std::str::from_utf8(value)
        .map_err(|_| XattrError::Invalid("value is not UTF-8".to_string()))?;
    let parts: Vec<&str> = rest.split('.').collect();

    match parts.as_slice() {
        ["branches"] => {
            let branches = branches_from_string(value)
                .filter(|b| !b.is_empty())
                .ok_or_else(|| XattrError::Invalid(format!("bad branch list '{value}'")))?;
            config.branches = branches;
            Ok(())
        }
        ["minfreespace"] => {
            config.min_free_space = value
                .parse()
                .map_err(|_| XattrError::Invalid(format!("bad byte count '{value}'")))?;
            Ok(())
        }
        ["moveonenospc"] => {
            config.move_on_enospc = parse_bool(value)
                .ok_or_else(|| XattrError::Invalid(format!("bad boolean '{value}'")))?;
            Ok(())
        }
        ["policies"] | ["version"] | ["pid"] => {
            Err(XattrError::Invalid("attribute is read-only".to_string()))
        }
        ["func", name] => {
            let op = FuseOp::from_name(name).ok_or(XattrError::NoAttr)?;
            let policy = Policy::from_name(value)
                .ok_or_else(|| XattrError::Invalid(format!("unknown policy '{value}'")))?;
            if !policy.valid_for(op.category()) {
                return Err(XattrError::Invalid(format!(
                    "policy '{value}' is not valid for {} operations",
                    op.category()
                )));
            }
            config.policies.insert(op, policy);
            Ok(())
        }
        ["category", name] => {
            let category = Category::from_name(name).ok_or(XattrError::NoAttr)?;
            let policy = Policy::from_name(value)
                .ok_or_else(|| XattrError::Invalid(format!("unknown policy '{value}'")))?;
            if !policy.valid_for(category) {
                return Err(XattrError::Invalid(format!(
                    "policy '{value}' is not valid for {category} operations"
                )));
            }
            for op in FuseOp::ALL {
                if op.category() == category {
                    config.policies.insert(op, policy);
                }
            }
            Ok(())
        }
        _ => Err(XattrError::NoAttr),
    }
}

/// Every attribute name the control entry answers, for listxattr.
pub fn control_attr_names() -> Vec<String> {
    let mut names: Vec<String> = [
        "branches",
        "minfreespace",
        "moveonenospc",
        "policies",
        "version",
        "pid",
    ]
    .iter()
    .map(|f| format!("{XATTR_PREFIX}{f}"))
    .collect();

    for category in Category::ALL {
        names.push(format!("{XATTR_PREFIX}category.{category}"));
    }
    for op in FuseOp::ALL {
        names.push(format!("{XATTR_PREFIX}func.{op}"));
    }
    names
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexfs_config::{BranchConfig, BranchMode};

    fn config() -> UnionConfig {
        UnionConfig {
            branches: vec![
                BranchConfig {
                    path: "/mnt/a".into(),
                    mode: BranchMode::ReadWrite,
                    min_free_space: None,
                },
                BranchConfig {
                    path: "/mnt/b".into(),
                    mode: BranchMode::ReadOnly,
                    min_free_space: None,
                },
            ],
            min_free_space: 4096,
            ..Default::default()
        }
        .effective()
    }

    fn read_string(config: &UnionConfig, name: &str) -> String {
        match control_getxattr(config, name, 4096).unwrap() {
            XattrOut::Data(d) => String::from_utf8(d).unwrap(),
            XattrOut::Size(_) => panic!("expected data"),
        }
    }

    #[test]
    fn test_size_probe_then_exact_read() {
        let config = config();
        let probed = match control_getxattr(&config, "user.plexfs.branches", 0).unwrap() {
            XattrOut::Size(n) => n,
            XattrOut::Data(_) => panic!("expected size"),
        };
        // a read with exactly the probed capacity succeeds and copies
        // that many bytes
        match control_getxattr(&config, "user.plexfs.branches", probed).unwrap() {
            XattrOut::Data(d) => assert_eq!(d.len(), probed),
            XattrOut::Size(_) => panic!("expected data"),
        }
    }

    #[test]
    fn test_short_buffer_is_range_error() {
        let config = config();
        assert_eq!(
            control_getxattr(&config, "user.plexfs.branches", 1),
            Err(XattrError::Range)
        );
    }

    #[test]
    fn test_scalar_fields_render_as_text() {
        let config = config();
        assert_eq!(
            read_string(&config, "user.plexfs.branches"),
            "/mnt/a=rw:/mnt/b=ro"
        );
        assert_eq!(read_string(&config, "user.plexfs.minfreespace"), "4096");
        assert_eq!(read_string(&config, "user.plexfs.moveonenospc"), "false");
        assert_eq!(
            read_string(&config, "user.plexfs.pid"),
            std::process::id().to_string()
        );
        assert!(!read_string(&config, "user.plexfs.version").is_empty());
    }

    #[test]
    fn test_unknown_attr_is_no_attr() {
        let config = config();
        for name in [
            "user.plexfs.nope",
            "user.plexfs.category.nope",
            "user.plexfs.func.nope",
            "user.other.branches",
            "security.selinux",
        ] {
            assert_eq!(
                control_getxattr(&config, name, 0),
                Err(XattrError::NoAttr),
                "{name}"
            );
        }
    }

    #[test]
    fn test_category_set_is_sorted_and_deduped() {
        let mut config = config();
        config.policies.insert(FuseOp::Getattr, Policy::Newest);
        config.policies.insert(FuseOp::Open, Policy::Newest);
        // search ops now use first-found and newest
        let value = read_string(&config, "user.plexfs.category.search");
        assert_eq!(value, "first-found,newest");
    }

    #[test]
    fn test_func_attr_reads_single_assignment() {
        let config = config();
        assert_eq!(
            read_string(&config, "user.plexfs.func.create"),
            "most-free-space"
        );
        assert_eq!(read_string(&config, "user.plexfs.func.rmdir"), "all-found");
    }

    #[test]
    fn test_set_branches_round_trips() {
        let mut config = config();
        control_setxattr(
            &mut config,
            "user.plexfs.branches",
            b"/mnt/x=rw:/mnt/y=nc",
        )
        .unwrap();
        assert_eq!(config.branches.len(), 2);
        assert_eq!(config.branches[1].path, "/mnt/y");
        assert_eq!(config.branches[1].mode, BranchMode::NoCreate);
        assert_eq!(
            read_string(&config, "user.plexfs.branches"),
            "/mnt/x=rw:/mnt/y=nc"
        );
    }

    #[test]
    fn test_set_minfreespace_and_bool() {
        let mut config = config();
        control_setxattr(&mut config, "user.plexfs.minfreespace", b"1048576").unwrap();
        assert_eq!(config.min_free_space, 1 << 20);

        control_setxattr(&mut config, "user.plexfs.moveonenospc", b"true").unwrap();
        assert!(config.move_on_enospc);

        assert!(matches!(
            control_setxattr(&mut config, "user.plexfs.minfreespace", b"lots"),
            Err(XattrError::Invalid(_))
        ));
        assert!(matches!(
            control_setxattr(&mut config, "user.plexfs.moveonenospc", b"yes"),
            Err(XattrError::Invalid(_))
        ));
    }

    #[test]
    fn test_set_func_checks_category() {
        let mut config = config();
        control_setxattr(&mut config, "user.plexfs.func.create", b"existing-path").unwrap();
        assert_eq!(config.policy_for(FuseOp::Create), Policy::ExistingPath);

        // newest is search-only
        assert!(matches!(
            control_setxattr(&mut config, "user.plexfs.func.create", b"newest"),
            Err(XattrError::Invalid(_))
        ));
    }

    #[test]
    fn test_set_category_assigns_every_op() {
        let mut config = config();
        control_setxattr(&mut config, "user.plexfs.category.search", b"newest").unwrap();
        for op in FuseOp::ALL {
            if op.category() == Category::Search {
                assert_eq!(config.policy_for(op), Policy::Newest);
            }
        }
        assert_eq!(
            read_string(&config, "user.plexfs.category.search"),
            "newest"
        );
    }

    #[test]
    fn test_read_only_fields_refuse_writes() {
        let mut config = config();
        for name in ["user.plexfs.pid", "user.plexfs.version", "user.plexfs.policies"] {
            assert!(matches!(
                control_setxattr(&mut config, name, b"1"),
                Err(XattrError::Invalid(_))
            ));
        }
    }

    #[test]
    fn test_diag_attr_parsing() {
        assert_eq!(parse_diag("user.plexfs.basepath"), Some(DiagAttr::BasePath));
        assert_eq!(parse_diag("user.plexfs.relpath"), Some(DiagAttr::RelPath));
        assert_eq!(parse_diag("user.plexfs.fullpath"), Some(DiagAttr::FullPath));
        assert_eq!(parse_diag("user.plexfs.allpaths"), Some(DiagAttr::AllPaths));
        assert_eq!(parse_diag("user.plexfs.branches"), None);
        assert_eq!(parse_diag("user.mime_type"), None);
    }

    #[test]
    fn test_listxattr_names_cover_fields_and_funcs() {
        let names = control_attr_names();
        assert!(names.contains(&"user.plexfs.branches".to_string()));
        assert!(names.contains(&"user.plexfs.category.create".to_string()));
        assert!(names.contains(&"user.plexfs.func.utimens".to_string()));
        assert_eq!(names.len(), 6 + 3 + FuseOp::ALL.len());
    }
}
