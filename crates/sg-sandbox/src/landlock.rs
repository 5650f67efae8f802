//! Linux Landlock implementation.
//!
//! Uses the `landlock` crate with ABI V5 and BestEffort compatibility.
//! Default-deny: only paths listed in the policy are accessible.

use std::path::PathBuf;

use crate::policy::SandboxPolicy;
use crate::SandboxError;

use landlock::{
    Access, AccessFs, BitFlags, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreated,
    RulesetCreatedAttr, RulesetStatus, ABI,
};

/// Apply Landlock filesystem sandbox to the current process. Irreversible.
pub fn apply_landlock(policy: &SandboxPolicy) -> Result<(), SandboxError> {
    let abi = ABI::V5;

    let ruleset = Ruleset::default()
        .handle_access(AccessFs::from_all(abi))
        .map_err(|e| SandboxError::Platform(format!("Landlock ruleset creation failed: {e}")))?
        .create()
        .map_err(|e| SandboxError::Platform(format!("Landlock ruleset create failed: {e}")))?;

    let ruleset = add_paths(ruleset, &policy.writable, AccessFs::from_all(abi), "writable")?;
    let ruleset = add_paths(ruleset, &policy.readable, AccessFs::from_read(abi), "readable")?;

    // Denials are enforced by omission. A denied path nested under a writable
    // one cannot be carved out, so report it instead of pretending.
    for denied in shadowed_denials(policy) {
        eprintln!(
            "[sg:sandbox] warning: {} is under a writable path and stays accessible",
            denied.display()
        );
    }

    let status = ruleset
        .restrict_self()
        .map_err(|e| SandboxError::Platform(format!("Landlock restrict_self failed: {e}")))?;

    match status.ruleset {
        RulesetStatus::FullyEnforced => Ok(()),
        RulesetStatus::PartiallyEnforced => {
            eprintln!("[sg:sandbox] warning: Landlock partially enforced (kernel may lack full ABI support)");
            Ok(())
        }
        RulesetStatus::NotEnforced => Err(SandboxError::Platform(
            "Landlock not enforced (kernel support missing?)".to_string(),
        )),
    }
}

/// Grant `access` beneath every existing path in `paths`. Missing paths are
/// skipped since nothing can reach them anyway.
fn add_paths(
    mut ruleset: RulesetCreated,
    paths: &[PathBuf],
    access: BitFlags<AccessFs>,
    kind: &str,
) -> Result<RulesetCreated, SandboxError> {
    for path in paths {
        let Ok(fd) = PathFd::new(path) else {
            continue;
        };
        ruleset = ruleset
            .add_rule(PathBeneath::new(fd, access))
            .map_err(|e| {
                SandboxError::Platform(format!(
                    "Landlock add {kind} rule for {}: {e}",
                    path.display()
                ))
            })?;
    }
    Ok(ruleset)
}

fn shadowed_denials(policy: &SandboxPolicy) -> Vec<&PathBuf> {
    policy
        .denied
        .iter()
        .filter(|denied| policy.writable.iter().any(|w| denied.starts_with(w)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_under_writable_is_reported() {
        let policy = SandboxPolicy {
            writable: vec![PathBuf::from("/home/user")],
            readable: vec![],
            denied: vec![PathBuf::from("/home/user/.ssh"), PathBuf::from("/root/.aws")],
        };
        let shadowed = shadowed_denials(&policy);
        assert_eq!(shadowed, vec![&PathBuf::from("/home/user/.ssh")]);
    }

    #[test]
    fn no_shadowing_when_disjoint() {
        let policy = SandboxPolicy {
            writable: vec![PathBuf::from("/tmp")],
            readable: vec![],
            denied: vec![PathBuf::from("/home/user/.ssh")],
        };
        assert!(shadowed_denials(&policy).is_empty());
    }
}
