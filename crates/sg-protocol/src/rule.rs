//! Classification rules and risk levels.

use serde::{Deserialize, Serialize};

/// Risk level for a shell command, ordered from least to most dangerous.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    #[serde(alias = "low", alias = "Low")]
    Low,
    #[serde(alias = "medium", alias = "Medium")]
    Medium,
    #[serde(alias = "high", alias = "High")]
    High,
    #[serde(alias = "critical", alias = "Critical")]
    Critical,
}

impl RiskLevel {
    /// Human-readable label for display in the approval prompt.
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Machine-readable string for audit logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// What a matching rule does to the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    #[serde(alias = "allow")]
    Allow,
    #[serde(alias = "block")]
    Block,
    #[serde(alias = "require_confirmation")]
    RequireConfirmation,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Block => "block",
            RuleAction::RequireConfirmation => "require_confirmation",
        }
    }
}

/// One classification rule: a case-insensitive regex pattern and the verdict
/// attached to commands it matches.
///
/// Rules are never edited in place. The validator replaces its whole rule set
/// at once, so a `Rule` is a plain value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    pub action: RuleAction,
    pub risk: RiskLevel,
    pub description: String,
}

impl Rule {
    pub fn new(
        pattern: impl Into<String>,
        action: RuleAction,
        risk: RiskLevel,
        description: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            action,
            risk,
            description: description.into(),
        }
    }

    pub fn block(pattern: impl Into<String>, risk: RiskLevel, description: impl Into<String>) -> Self {
        Self::new(pattern, RuleAction::Block, risk, description)
    }

    pub fn confirm(
        pattern: impl Into<String>,
        risk: RiskLevel,
        description: impl Into<String>,
    ) -> Self {
        Self::new(pattern, RuleAction::RequireConfirmation, risk, description)
    }

    pub fn allow(pattern: impl Into<String>, risk: RiskLevel, description: impl Into<String>) -> Self {
        Self::new(pattern, RuleAction::Allow, risk, description)
    }
}
