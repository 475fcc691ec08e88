// Step validator
//
// Field rules are evaluated against submitted form data; rules that need
// permanent storage are stripped first (and recorded), because no store
// exists until the commit phase. Dependency checks consult completed-step
// ids only; whether a dependency is registered at all is the registry's
// startup concern.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::SetupError;
use crate::models::{StepDescriptor, ValidationResult};
use crate::registry::StepRegistry;
use crate::staging::lookup_path;
use super::rules::{strip_store_rules, Rule};

pub struct StepValidator;

impl StepValidator {
    /// Apply the step's declared field rules to `form`. Store-dependent rules
    /// are recorded as skipped, never evaluated.
    pub fn validate_fields(
        descriptor: &StepDescriptor,
        form: &Map<String, Value>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (field, rules) in descriptor.field_rules() {
            let (kept, skipped) = strip_store_rules(rules);
            for rule in &skipped {
                result.record_skipped(field.clone(), rule.name());
            }

            let value = lookup_path(form, field);

            for rule in &kept {
                if let Some(message) = check_rule(rule, field, value, form) {
                    result.add_error(field.clone(), message);
                }
            }
        }

        result
    }

    /// Record an error keyed by the descriptor id for every dependency
    /// missing from `completed`. Returns whether all dependencies are met.
    pub fn validate_dependencies(
        descriptor: &StepDescriptor,
        completed: &[String],
        result: &mut ValidationResult,
    ) -> bool {
        let mut satisfied = true;

        for dependency in descriptor.dependencies() {
            if !completed.iter().any(|c| c == dependency) {
                result.add_error(
                    descriptor.id(),
                    format!("requires step '{}' to be completed first", dependency),
                );
                satisfied = false;
            }
        }

        satisfied
    }

    /// Validate several steps at once. Stops at the first structural error
    /// (a dependency on an unregistered step) but collects every field-level
    /// error across the steps it does visit.
    pub fn validate_steps(
        registry: &StepRegistry,
        submissions: &[(&StepDescriptor, &Map<String, Value>)],
    ) -> Result<StepValidationReport, SetupError> {
        let mut step_errors = BTreeMap::new();

        for (descriptor, form) in submissions {
            for dependency in descriptor.dependencies() {
                if registry.resolve(dependency).is_err() {
                    return Err(SetupError::UnknownDependency {
                        step: descriptor.id().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }

            step_errors.insert(
                descriptor.id().to_string(),
                Self::validate_fields(descriptor, form),
            );
        }

        let passed = step_errors.values().all(ValidationResult::passed);
        Ok(StepValidationReport {
            passed,
            step_errors,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StepValidationReport {
    pub passed: bool,
    pub step_errors: BTreeMap<String, ValidationResult>,
}

fn check_rule(
    rule: &Rule,
    field: &str,
    value: Option<&Value>,
    form: &Map<String, Value>,
) -> Option<String> {
    let present = value.map(|v| !is_empty_value(v)).unwrap_or(false);

    if let Rule::Required = rule {
        return if present {
            None
        } else {
            Some(format!("the {} field is required", field))
        };
    }

    // Remaining rules only fire when a value was actually given.
    if !present {
        return None;
    }

    let value = value?;

    match rule {
        Rule::Required => None,
        Rule::Email => match value.as_str() {
            Some(s) if is_valid_email(s) => None,
            _ => Some("must be a valid email address".to_string()),
        },
        Rule::Url => match value.as_str() {
            Some(s) if url::Url::parse(s).is_ok() => None,
            _ => Some("must be a valid URL".to_string()),
        },
        Rule::Numeric => {
            let ok = value.is_number()
                || value
                    .as_str()
                    .map(|s| s.trim().parse::<f64>().is_ok())
                    .unwrap_or(false);
            if ok {
                None
            } else {
                Some("must be a number".to_string())
            }
        }
        Rule::Boolean => {
            let ok = value.is_boolean()
                || value
                    .as_str()
                    .map(|s| matches!(s, "true" | "false" | "0" | "1"))
                    .unwrap_or(false);
            if ok {
                None
            } else {
                Some("must be true or false".to_string())
            }
        }
        Rule::MinLength(n) => match value.as_str() {
            Some(s) if s.chars().count() >= *n => None,
            Some(_) => Some(format!("must be at least {} characters", n)),
            None => Some("must be a string".to_string()),
        },
        Rule::MaxLength(n) => match value.as_str() {
            Some(s) if s.chars().count() <= *n => None,
            Some(_) => Some(format!("may not be longer than {} characters", n)),
            None => Some("must be a string".to_string()),
        },
        Rule::InSet(values) => {
            let candidate = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Some(format!("must be one of: {}", values.join(", "))),
            };
            if values.contains(&candidate) {
                None
            } else {
                Some(format!("must be one of: {}", values.join(", ")))
            }
        }
        Rule::Confirmed => {
            let confirmation = lookup_path(form, &format!("{}_confirmation", field));
            if confirmation == Some(value) {
                None
            } else {
                Some("confirmation does not match".to_string())
            }
        }
        // Stripped before evaluation; unreachable by construction.
        Rule::UniqueInStore { .. } | Rule::ExistsInStore { .. } => None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn is_valid_email(s: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}
