//! Validation verdicts and privilege categories.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::rule::RiskLevel;

/// Privilege category a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Admin => "admin",
        }
    }

    /// Priority used when one permission has to speak for a whole set.
    /// ADMIN outranks WRITE, which outranks EXECUTE.
    fn priority(&self) -> u8 {
        match self {
            Permission::Admin => 3,
            Permission::Write => 2,
            Permission::Execute => 1,
            Permission::Read => 0,
        }
    }
}

/// Set of permissions with no duplicates and a stable iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    /// The highest-priority member: ADMIN > WRITE > EXECUTE > READ.
    pub fn highest(&self) -> Option<Permission> {
        self.0.iter().copied().max_by_key(Permission::priority)
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.0.iter().map(Permission::as_str).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

/// Outcome of classifying one command against the rule table.
///
/// A blocked command is expressed here, not as an error: `is_valid` is false
/// and `blocked_reasons` / `suggested_alternatives` explain why and what to
/// run instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub blocked_reasons: Vec<String>,
    pub required_permissions: PermissionSet,
    pub suggested_alternatives: Vec<String>,
    pub risk_assessment: RiskLevel,
    /// True when at least one REQUIRE_CONFIRMATION rule matched.
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmation_reasons: Vec<String>,
    /// Descriptions of every rule that matched, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_rules: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            blocked_reasons: Vec::new(),
            required_permissions: PermissionSet::new(),
            suggested_alternatives: Vec::new(),
            risk_assessment: RiskLevel::Low,
            requires_confirmation: false,
            confirmation_reasons: Vec::new(),
            matched_rules: Vec::new(),
        }
    }
}

impl ValidationResult {
    /// Raise the overall risk. Never lowers it.
    pub fn escalate(&mut self, risk: RiskLevel) {
        if risk > self.risk_assessment {
            self.risk_assessment = risk;
        }
    }
}
