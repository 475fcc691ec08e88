// Requirement checks
//
// Evaluates environment facts against the declared requirements before any
// step runs: host runtime version, required capabilities (executables on
// PATH), and filesystem permissions. Checks report Pass/Warn/Fail with a
// detail string; strict mode elevates warnings to failures.

use log::{info, warn};
use serde::Serialize;
use std::path::Path;

use crate::config::WizardConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementReport {
    pub checks: Vec<RequirementCheck>,
}

impl RequirementReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    fn push(&mut self, name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) {
        self.checks.push(RequirementCheck {
            name: name.into(),
            status,
            detail: detail.into(),
        });
    }
}

pub struct RequirementChecker {
    config: WizardConfig,
}

impl RequirementChecker {
    pub fn new(config: WizardConfig) -> Self {
        RequirementChecker { config }
    }

    /// Run every configured check. `runtime_version` is the host
    /// application's runtime version as reported by its environment; the
    /// engine does not guess it.
    pub fn check_all(&self, runtime_version: &str) -> RequirementReport {
        info!(
            "[PHASE: requirements] [STEP: check_all] Running requirement checks (strict={})",
            self.config.strict_requirements
        );

        let mut report = RequirementReport::default();

        self.check_runtime_version(runtime_version, &mut report);
        self.check_capabilities(&mut report);
        self.check_path_permissions(&mut report);

        if !report.passed() {
            warn!(
                "[PHASE: requirements] [STEP: check_all] {} check(s) failed",
                report
                    .checks
                    .iter()
                    .filter(|c| c.status == CheckStatus::Fail)
                    .count()
            );
        }

        report
    }

    fn check_runtime_version(&self, actual: &str, report: &mut RequirementReport) {
        let Some(minimum) = &self.config.minimum_runtime_version else {
            return;
        };

        match version_at_least(actual, minimum) {
            Some(true) => report.push(
                "Runtime Version",
                CheckStatus::Pass,
                format!("{} satisfies minimum {}", actual, minimum),
            ),
            Some(false) => report.push(
                "Runtime Version",
                CheckStatus::Fail,
                format!("{} is below minimum {}", actual, minimum),
            ),
            None => report.push(
                "Runtime Version",
                self.warn_or_fail(),
                format!("unable to compare '{}' against minimum {}", actual, minimum),
            ),
        }
    }

    fn check_capabilities(&self, report: &mut RequirementReport) {
        for (name, binary) in &self.config.required_capabilities {
            match which::which(binary) {
                Ok(path) => report.push(
                    name.clone(),
                    CheckStatus::Pass,
                    format!("{} found at {:?}", binary, path),
                ),
                Err(_) => report.push(
                    name.clone(),
                    self.warn_or_fail(),
                    format!("{} not found on PATH", binary),
                ),
            }
        }
    }

    fn check_path_permissions(&self, report: &mut RequirementReport) {
        for (path, permission) in &self.config.path_permissions {
            let p = Path::new(path);
            let name = format!("Path {}", path);

            if !p.exists() {
                report.push(name, CheckStatus::Fail, "path does not exist".to_string());
                continue;
            }

            if permission.contains('r') && std::fs::metadata(p).is_err() {
                report.push(name, CheckStatus::Fail, "path is not readable".to_string());
                continue;
            }

            if permission.contains('w') && !probe_writable(p) {
                report.push(name, CheckStatus::Fail, "path is not writable".to_string());
                continue;
            }

            report.push(
                name,
                CheckStatus::Pass,
                format!("'{}' permission satisfied", permission),
            );
        }
    }

    fn warn_or_fail(&self) -> CheckStatus {
        if self.config.strict_requirements {
            CheckStatus::Fail
        } else {
            CheckStatus::Warn
        }
    }
}

/// Best-effort writability probe: actually try to create (and remove) a file.
fn probe_writable(path: &Path) -> bool {
    if path.is_dir() {
        let probe = path.join(".setup-wizard-probe");
        match std::fs::File::create(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    } else {
        std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }
}

/// Compare dotted-numeric versions segment by segment; missing segments
/// count as zero. Returns None when either side has a non-numeric segment.
fn version_at_least(actual: &str, minimum: &str) -> Option<bool> {
    let parse = |v: &str| -> Option<Vec<u64>> {
        v.trim()
            .split('.')
            .map(|s| s.parse::<u64>().ok())
            .collect()
    };

    let actual = parse(actual)?;
    let minimum = parse(minimum)?;
    let len = actual.len().max(minimum.len());

    for i in 0..len {
        let a = actual.get(i).copied().unwrap_or(0);
        let m = minimum.get(i).copied().unwrap_or(0);
        if a != m {
            return Some(a > m);
        }
    }
    Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_version_comparison() {
        assert_eq!(version_at_least("8.2", "8.1"), Some(true));
        assert_eq!(version_at_least("8.1", "8.1"), Some(true));
        assert_eq!(version_at_least("8.0.30", "8.1"), Some(false));
        assert_eq!(version_at_least("8.1", "8.1.2"), Some(false));
        assert_eq!(version_at_least("10.0", "9.9"), Some(true));
        assert_eq!(version_at_least("not-a-version", "8.1"), None);
    }

    #[test]
    fn test_runtime_version_below_minimum_fails() {
        let checker = RequirementChecker::new(WizardConfig {
            minimum_runtime_version: Some("8.1".to_string()),
            ..WizardConfig::default()
        });

        let report = checker.check_all("7.4");
        assert!(!report.passed());
    }

    #[test]
    fn test_missing_capability_warns_then_fails_in_strict_mode() {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(
            "Improbable Tool".to_string(),
            "definitely-not-a-real-binary-1a2b3c".to_string(),
        );

        let lenient = RequirementChecker::new(WizardConfig {
            required_capabilities: capabilities.clone(),
            ..WizardConfig::default()
        });
        let report = lenient.check_all("8.2");
        assert!(report.passed());
        assert_eq!(report.checks[0].status, CheckStatus::Warn);

        let strict = RequirementChecker::new(WizardConfig {
            required_capabilities: capabilities,
            strict_requirements: true,
            ..WizardConfig::default()
        });
        assert!(!strict.check_all("8.2").passed());
    }

    #[test]
    fn test_path_permission_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = BTreeMap::new();
        paths.insert(dir.path().to_string_lossy().to_string(), "rw".to_string());
        paths.insert("/definitely/not/here".to_string(), "r".to_string());

        let checker = RequirementChecker::new(WizardConfig {
            path_permissions: paths,
            ..WizardConfig::default()
        });

        let report = checker.check_all("8.2");
        assert!(!report.passed());

        let statuses: Vec<CheckStatus> = report.checks.iter().map(|c| c.status).collect();
        assert!(statuses.contains(&CheckStatus::Pass));
        assert!(statuses.contains(&CheckStatus::Fail));
    }
}
