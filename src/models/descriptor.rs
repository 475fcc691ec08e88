// Step descriptor
//
// Immutable description of one wizard step, created at plugin-registration
// time. The descriptor carries everything the engine needs to order, display,
// and validate the step; behavior lives in the step's handler.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::SetupError;
use crate::staging::StagedSnapshot;
use crate::validation::{parse_rules, Rule};

/// Pure function of the staged snapshot deciding whether a step appears in
/// the active sequence. A hidden step's staged data, if any, is retained.
pub type DisplayPredicate = Arc<dyn Fn(&StagedSnapshot) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct StepDescriptor {
    id: String,
    position: i32,
    depends_on: BTreeSet<String>,
    display_when: Option<DisplayPredicate>,
    field_rules: BTreeMap<String, Vec<Rule>>,
}

impl StepDescriptor {
    pub fn new(id: impl Into<String>, position: i32) -> Self {
        StepDescriptor {
            id: id.into(),
            position,
            depends_on: BTreeSet::new(),
            display_when: None,
            field_rules: BTreeMap::new(),
        }
    }

    /// Require `step_id` to have completed before this step may execute.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }

    pub fn display_when(
        mut self,
        predicate: impl Fn(&StagedSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.display_when = Some(Arc::new(predicate));
        self
    }

    /// Attach field rules in the compact string form
    /// (e.g. `"required|email|unique:users,email"`). Malformed rule strings
    /// are a configuration error and refuse the descriptor outright.
    pub fn rule(mut self, field: impl Into<String>, spec: &str) -> Result<Self, SetupError> {
        let field = field.into();
        let rules = parse_rules(spec).map_err(|reason| SetupError::InvalidRule {
            field: field.clone(),
            rule: spec.to_string(),
            reason,
        })?;
        self.field_rules.insert(field, rules);
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    pub fn field_rules(&self) -> &BTreeMap<String, Vec<Rule>> {
        &self.field_rules
    }

    /// Steps with no predicate are always displayed.
    pub fn is_displayed(&self, snapshot: &StagedSnapshot) -> bool {
        match &self.display_when {
            Some(predicate) => predicate(snapshot),
            None => true,
        }
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("depends_on", &self.depends_on)
            .field("has_display_predicate", &self.display_when.is_some())
            .field("rule_fields", &self.field_rules.keys().collect::<Vec<_>>())
            .finish()
    }
}
