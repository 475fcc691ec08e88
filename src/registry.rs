// Step registry
//
// Plugins register their steps at process start through this explicit API;
// the core never scans for plugins. Ordering is a stable sort on position
// with registration order breaking ties, enforced rather than left to
// collection iteration order.

use log::info;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::WizardConfig;
use crate::errors::SetupError;
use crate::lifecycle::{StageFormHandler, StepHandler};
use crate::models::StepDescriptor;
use crate::staging::StagedSnapshot;

struct RegisteredStep {
    descriptor: Arc<StepDescriptor>,
    handler: Arc<dyn StepHandler>,
}

#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<RegisteredStep>,
    by_id: HashMap<String, usize>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step with the default stage-the-form handler.
    pub fn register(&mut self, descriptor: StepDescriptor) -> Result<(), SetupError> {
        self.register_with_handler(descriptor, Arc::new(StageFormHandler))
    }

    pub fn register_with_handler(
        &mut self,
        descriptor: StepDescriptor,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), SetupError> {
        let id = descriptor.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(SetupError::DuplicateStep(id));
        }

        info!(
            "[PHASE: registration] [STEP: {}] Registered at position {}",
            id,
            descriptor.position()
        );

        self.by_id.insert(id, self.steps.len());
        self.steps.push(RegisteredStep {
            descriptor: Arc::new(descriptor),
            handler,
        });
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<StepDescriptor>, SetupError> {
        self.by_id
            .get(id)
            .map(|&i| self.steps[i].descriptor.clone())
            .ok_or_else(|| SetupError::StepNotFound(id.to_string()))
    }

    pub fn handler(&self, id: &str) -> Result<Arc<dyn StepHandler>, SetupError> {
        self.by_id
            .get(id)
            .map(|&i| self.steps[i].handler.clone())
            .ok_or_else(|| SetupError::StepNotFound(id.to_string()))
    }

    /// The ordered, deduplicated sequence of steps active for `snapshot`:
    /// display-predicate filter, then ascending `(position, registration
    /// order)`. Deterministic for a fixed snapshot.
    pub fn active_sequence(&self, snapshot: &StagedSnapshot) -> Vec<Arc<StepDescriptor>> {
        let mut active: Vec<(usize, &RegisteredStep)> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.descriptor.is_displayed(snapshot))
            .collect();

        active.sort_by_key(|(index, s)| (s.descriptor.position(), *index));
        active.into_iter().map(|(_, s)| s.descriptor.clone()).collect()
    }

    /// Startup check, run once after every plugin has registered: every
    /// declared dependency and every configured core step must resolve.
    /// Plugins may therefore register in any order.
    pub fn verify(&self, config: &WizardConfig) -> Result<(), SetupError> {
        for step in &self.steps {
            for dependency in step.descriptor.dependencies() {
                if !self.by_id.contains_key(dependency) {
                    return Err(SetupError::UnknownDependency {
                        step: step.descriptor.id().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for id in &config.step_order {
            if !self.by_id.contains_key(id) {
                return Err(SetupError::MissingConfiguredStep(id.clone()));
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
