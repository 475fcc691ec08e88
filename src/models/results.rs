// Validation and installation result models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-step validation outcome: field path -> error messages. An empty error
/// map means the step passed. Produced fresh on every attempt, never merged
/// with a previous result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    #[serde(default)]
    errors: BTreeMap<String, Vec<String>>,
    /// Store-dependent rules that were stripped before evaluation. Declared,
    /// not silent: callers and tests can see exactly what was skipped.
    #[serde(default)]
    skipped_rules: Vec<SkippedRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRule {
    pub field: String,
    pub rule: String,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    pub fn record_skipped(&mut self, field: impl Into<String>, rule: impl Into<String>) {
        self.skipped_rules.push(SkippedRule {
            field: field.into(),
            rule: rule.into(),
        });
    }

    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    pub fn field_errors(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn skipped_rules(&self) -> &[SkippedRule] {
        &self.skipped_rules
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Success,
    Error,
}

/// Terminal, immutable report of one `InstallationManager::execute` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationResult {
    pub status: InstallStatus,
    pub message: String,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub committed_steps: Vec<String>,
}

impl InstallationResult {
    pub fn success(
        message: impl Into<String>,
        output: Vec<String>,
        committed_steps: Vec<String>,
    ) -> Self {
        InstallationResult {
            status: InstallStatus::Success,
            message: message.into(),
            output,
            committed_steps,
        }
    }

    pub fn error(
        message: impl Into<String>,
        output: Vec<String>,
        committed_steps: Vec<String>,
    ) -> Self {
        InstallationResult {
            status: InstallStatus::Error,
            message: message.into(),
            output,
            committed_steps,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == InstallStatus::Success
    }
}
