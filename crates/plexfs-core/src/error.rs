/// Errors from branch selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// No branch contains the path (or its parent, for existing-path
    /// create policies).
    #[error("no branch contains the path")]
    NotFound,

    /// Eligibility filtering removed every candidate because of free-space
    /// thresholds.
    #[error("no branch has enough free space")]
    NoSpace,

    /// Eligibility filtering removed every candidate because of branch
    /// modes.
    #[error("no writable branch is available")]
    ReadOnly,
}

impl PolicyError {
    /// The errno reported to filesystem clients.
    pub fn errno(&self) -> i32 {
        match self {
            PolicyError::NotFound => libc::ENOENT,
            PolicyError::NoSpace => libc::ENOSPC,
            PolicyError::ReadOnly => libc::EROFS,
        }
    }
}

/// Errors from the extended-attribute control protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XattrError {
    /// Unknown or malformed attribute name.
    #[error("no such attribute")]
    NoAttr,

    /// Destination buffer too small for the attribute value.
    #[error("value does not fit the destination buffer")]
    Range,

    /// Write with a value that does not parse for the addressed field.
    #[error("invalid value for attribute: {0}")]
    Invalid(String),
}

impl XattrError {
    pub fn errno(&self) -> i32 {
        match self {
            // ENOATTR is ENODATA on Linux
            XattrError::NoAttr => libc::ENODATA,
            XattrError::Range => libc::ERANGE,
            XattrError::Invalid(_) => libc::EINVAL,
        }
    }
}

/// Combined error type for engine entry points that can fail either way.
#[derive(Debug, thiserror::Error)]
pub enum UnionError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Xattr(#[from] XattrError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UnionError {
    pub fn errno(&self) -> i32 {
        match self {
            UnionError::Policy(e) => e.errno(),
            UnionError::Xattr(e) => e.errno(),
            UnionError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_errnos() {
        assert_eq!(PolicyError::NotFound.errno(), libc::ENOENT);
        assert_eq!(PolicyError::NoSpace.errno(), libc::ENOSPC);
        assert_eq!(PolicyError::ReadOnly.errno(), libc::EROFS);
    }

    #[test]
    fn test_xattr_errnos() {
        assert_eq!(XattrError::NoAttr.errno(), libc::ENODATA);
        assert_eq!(XattrError::Range.errno(), libc::ERANGE);
        assert_eq!(XattrError::Invalid("x".into()).errno(), libc::EINVAL);
    }

    #[test]
    fn test_union_error_passthrough() {
        let io = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(UnionError::Io(io).errno(), libc::EACCES);
        assert_eq!(
            UnionError::from(PolicyError::NotFound).errno(),
            libc::ENOENT
        );
    }
}
