//! Command classification against the active rule table.
//!
//! The table is an immutable snapshot. Validation clones the current `Arc`
//! and never takes a write lock; `update_rules` compiles a complete new
//! snapshot, persists it, then swaps it in, so a concurrent validator sees
//! either the old rule set or the new one and never a mix.

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::{Regex, RegexBuilder};
use sg_protocol::{Rule, RuleAction, ValidationResult};

use crate::error::Result;
use crate::permissions::PermissionAnalyzer;
use crate::rules::{default_rules, RuleStore};

/// A rule together with its compiled pattern.
#[derive(Debug)]
struct CompiledRule {
    rule: Rule,
    regex: Regex,
}

/// One immutable generation of the rule set.
#[derive(Debug)]
pub struct RuleTable {
    /// Every rule as declared, including ones whose pattern did not compile.
    rules: Vec<Rule>,
    compiled: Vec<CompiledRule>,
}

impl RuleTable {
    /// Compile `rules` in declaration order. A malformed pattern is logged and
    /// left out of matching; the other rules are unaffected.
    pub fn compile(rules: Vec<Rule>) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| {
                match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(CompiledRule {
                        rule: rule.clone(),
                        regex,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            pattern = %rule.pattern,
                            description = %rule.description,
                            error = %e,
                            "skipping malformed rule"
                        );
                        None
                    }
                }
            })
            .collect();

        Self { rules, compiled }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules that take part in matching.
    pub fn active_len(&self) -> usize {
        self.compiled.len()
    }

    /// Number of rules skipped because their pattern is malformed.
    pub fn skipped_len(&self) -> usize {
        self.rules.len() - self.compiled.len()
    }
}

/// Trim and collapse whitespace runs to single spaces.
pub fn normalize(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Safe alternatives offered for a blocked command, by category.
struct AlternativeCategory {
    matcher: Regex,
    suggestions: &'static [&'static str],
}

static ALTERNATIVES: LazyLock<Vec<AlternativeCategory>> = LazyLock::new(|| {
    let category = |pattern: &str, suggestions: &'static [&'static str]| AlternativeCategory {
        matcher: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("alternative category pattern is valid and tested"),
        suggestions,
    };
    vec![
        category(
            r"\b(?:remove-item|ri|rd|rmdir|del|erase|rm)\b",
            &[
                "Get-ChildItem <path> -Recurse",
                "ls -R <path>",
                "Remove-Item <path> -Recurse -WhatIf",
            ],
        ),
        category(
            r"\b(?:format-volume|format|clear-disk|initialize-disk|mkfs(?:\.[a-z0-9]+)?|diskpart|dd)\b",
            &["Get-Volume", "Get-Disk", "lsblk", "df -h"],
        ),
        category(
            r"\b(?:stop-computer|restart-computer|shutdown|reboot|poweroff|halt)\b",
            &["Get-CimInstance Win32_OperatingSystem", "uptime"],
        ),
        category(
            r"\b(?:[a-z]+-service|sc|systemctl|service)\b",
            &["Get-Service <name>", "systemctl status <name>"],
        ),
    ]
});

const GENERIC_ALTERNATIVES: &[&str] = &[
    "Run a read-only query first (Get-ChildItem, Get-Content, ls, cat)",
    "Narrow the command to a specific path and preview it with -WhatIf",
];

/// Suggestions for a blocked command. Never empty.
pub fn alternatives_for(command: &str) -> Vec<String> {
    let mut out: Vec<String> = ALTERNATIVES
        .iter()
        .filter(|c| c.matcher.is_match(command))
        .flat_map(|c| c.suggestions.iter().map(|s| s.to_string()))
        .collect();
    if out.is_empty() {
        out = GENERIC_ALTERNATIVES.iter().map(|s| s.to_string()).collect();
    }
    out
}

/// Classifies commands against an atomically swappable rule table.
pub struct WhitelistValidator {
    table: RwLock<Arc<RuleTable>>,
    store: Option<RuleStore>,
    analyzer: PermissionAnalyzer,
}

impl WhitelistValidator {
    /// In-memory validator with the given rules. Updates are not persisted.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            table: RwLock::new(Arc::new(RuleTable::compile(rules))),
            store: None,
            analyzer: PermissionAnalyzer::new(),
        }
    }

    /// In-memory validator with the built-in policy.
    pub fn with_defaults() -> Self {
        Self::new(default_rules())
    }

    /// Load the rule document at startup. A missing document yields the
    /// built-in policy; an unreadable or invalid one is an error.
    pub fn load(store: RuleStore) -> Result<Self> {
        let rules = match store.load()? {
            Some(rules) => {
                tracing::debug!(path = %store.path().display(), rules = rules.len(), "rules loaded");
                rules
            }
            None => default_rules(),
        };
        Ok(Self {
            table: RwLock::new(Arc::new(RuleTable::compile(rules))),
            store: Some(store),
            analyzer: PermissionAnalyzer::new(),
        })
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RuleTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The active rules, as declared.
    pub fn rules(&self) -> Vec<Rule> {
        self.snapshot().rules().to_vec()
    }

    pub fn store(&self) -> Option<&RuleStore> {
        self.store.as_ref()
    }

    /// Classify `command`.
    pub fn validate(&self, command: &str) -> ValidationResult {
        let normalized = normalize(command);
        let mut result = ValidationResult::default();
        if normalized.is_empty() {
            return result;
        }

        let table = self.snapshot();
        for entry in &table.compiled {
            if !entry.regex.is_match(&normalized) {
                continue;
            }
            let rule = &entry.rule;
            tracing::debug!(
                action = rule.action.as_str(),
                risk = rule.risk.as_str(),
                description = %rule.description,
                "rule matched"
            );
            result.matched_rules.push(rule.description.clone());
            result.escalate(rule.risk);
            match rule.action {
                RuleAction::Block => {
                    result.is_valid = false;
                    result.blocked_reasons.push(rule.description.clone());
                }
                RuleAction::RequireConfirmation => {
                    result.requires_confirmation = true;
                    result.confirmation_reasons.push(rule.description.clone());
                }
                RuleAction::Allow => {}
            }
        }

        result.required_permissions = self.analyzer.check_permissions(&normalized);
        if !result.is_valid {
            result.suggested_alternatives = alternatives_for(&normalized);
        }
        result
    }

    /// Replace the whole rule set. The new set is persisted before it becomes
    /// active; if persisting fails the active set is unchanged.
    pub fn update_rules(&self, rules: Vec<Rule>) -> Result<()> {
        let table = Arc::new(RuleTable::compile(rules));
        if let Some(ref store) = self.store {
            store.save(table.rules())?;
        }

        let mut current = self.table.write().unwrap_or_else(PoisonError::into_inner);
        *current = table;
        tracing::info!(
            active = current.active_len(),
            skipped = current.skipped_len(),
            "rule set replaced"
        );
        Ok(())
    }

    /// Replace the rule set with the built-in policy.
    pub fn reset_to_defaults(&self) -> Result<()> {
        self.update_rules(default_rules())
    }

    pub fn analyzer(&self) -> &PermissionAnalyzer {
        &self.analyzer
    }
}

impl Default for WhitelistValidator {
    fn default() -> Self {
        Self::with_defaults()
    }
}
