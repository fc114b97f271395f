//! Fan-out of one operation across every branch an action policy selected.

use std::io;
use std::path::Path;

use crate::resolve::ResolvedPath;

/// Apply `op` to every resolved path, in branch-set order, never skipping
/// the remainder after a failure.
///
/// Aggregation is success-if-any: the overall result is `Ok` when at least
/// one branch-level call succeeds. Only when every call fails is an error
/// reported, and it is the errno of the last failing branch. Branches that
/// already succeeded are not rolled back; actions are not transactional
/// across branches.
pub fn fan_out<F>(targets: &[ResolvedPath], mut op: F) -> Result<(), i32>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut any_ok = false;
    let mut last_errno = libc::ENOENT;

    for target in targets {
        match op(&target.full) {
            Ok(()) => any_ok = true,
            Err(e) => last_errno = e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    if any_ok {
        Ok(())
    } else {
        Err(last_errno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn targets(paths: &[&str]) -> Vec<ResolvedPath> {
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| ResolvedPath {
                branch_index: i,
                base: PathBuf::from(format!("/b{i}")),
                full: PathBuf::from(p),
            })
            .collect()
    }

    fn errno(code: i32) -> io::Error {
        io::Error::from_raw_os_error(code)
    }

    #[test]
    fn test_visits_every_target_once_in_order() {
        let ts = targets(&["/b0/x", "/b1/x", "/b2/x"]);
        let mut visited = Vec::new();

        fan_out(&ts, |p| {
            visited.push(p.to_path_buf());
            Ok(())
        })
        .unwrap();

        assert_eq!(
            visited,
            vec![
                PathBuf::from("/b0/x"),
                PathBuf::from("/b1/x"),
                PathBuf::from("/b2/x")
            ]
        );
    }

    #[test]
    fn test_success_if_any() {
        // removal succeeds on one branch, the other copy is already gone
        let ts = targets(&["/b0/x", "/b1/x"]);
        let result = fan_out(&ts, |p| {
            if p.starts_with("/b0") {
                Ok(())
            } else {
                Err(errno(libc::ENOENT))
            }
        });
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_failure_never_skips_remaining_branches() {
        let ts = targets(&["/b0/x", "/b1/x", "/b2/x"]);
        let mut count = 0;

        let result = fan_out(&ts, |_| {
            count += 1;
            if count == 1 {
                Err(errno(libc::EACCES))
            } else {
                Ok(())
            }
        });

        assert_eq!(count, 3);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_all_fail_reports_last_errno() {
        let ts = targets(&["/b0/x", "/b1/x", "/b2/x"]);
        let mut errnos = [libc::EACCES, libc::EIO, libc::EPERM].into_iter();

        let result = fan_out(&ts, |_| Err(errno(errnos.next().unwrap())));
        assert_eq!(result, Err(libc::EPERM));
    }

    #[test]
    fn test_empty_target_set_is_enoent() {
        let result = fan_out(&[], |_| Ok(()));
        assert_eq!(result, Err(libc::ENOENT));
    }
}
