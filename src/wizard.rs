// Setup wizard
//
// Owns the registry, the run context, and the one in-flight step lifecycle,
// and advances through the active sequence one completed step at a time.
// Re-entry into a finalized deployment is refused unless the development
// override is set.

use log::info;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::WizardConfig;
use crate::context::RunContext;
use crate::errors::SetupError;
use crate::events::{EventBus, EventListener, InstallEvent};
use crate::install::{InstallOptions, InstallationManager, PermanentStore};
use crate::lifecycle::{StepLifecycle, SubmitOutcome};
use crate::models::InstallationResult;
use crate::registry::StepRegistry;
use crate::requirements::{RequirementChecker, RequirementReport};
use crate::schema::SchemaIntrospector;

pub struct SetupWizard {
    config: WizardConfig,
    registry: StepRegistry,
    events: EventBus,
    ctx: RunContext,
    current: Option<StepLifecycle>,
}

impl SetupWizard {
    /// Build the wizard after every plugin has registered its steps. The
    /// registry is verified here: unknown dependencies and missing
    /// configured steps are fatal at startup.
    pub fn new(
        config: WizardConfig,
        registry: StepRegistry,
        ctx: RunContext,
    ) -> Result<Self, SetupError> {
        registry.verify(&config)?;

        Ok(SetupWizard {
            config,
            registry,
            events: EventBus::new(),
            ctx,
            current: None,
        })
    }

    pub fn subscribe(&mut self, listener: Arc<dyn EventListener>) {
        self.events.subscribe(listener);
    }

    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.ctx
    }

    /// Enter (or resume) the install run. Refused once the completion
    /// marker exists, unless the development override is set.
    pub async fn enter(&mut self) -> Result<(), SetupError> {
        let marker = self.config.completion_marker_path();
        let marker_exists = tokio::fs::try_exists(&marker).await.unwrap_or(false);

        if (marker_exists || self.ctx.state().finalized) && !self.config.dev_override {
            return Err(SetupError::AlreadyFinalized);
        }

        info!(
            "[PHASE: wizard] [STEP: enter] Entering setup (run_id={}, resumed_steps={})",
            self.ctx.run_id(),
            self.ctx.state().completed_steps.len()
        );

        self.events.emit(&InstallEvent::InstallationStarted {
            run_id: self.ctx.run_id().to_string(),
            config: json!({
                "stepOrder": self.config.step_order,
                "strictRequirements": self.config.strict_requirements,
                "devOverride": self.config.dev_override,
            }),
        });

        self.advance().await
    }

    /// Id of the step currently awaiting input, if any.
    pub fn current_step_id(&self) -> Option<&str> {
        self.current.as_ref().map(|lc| lc.descriptor().id())
    }

    /// All steps visited; the wizard is ready for the commit phase.
    pub fn is_ready_to_commit(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&StepLifecycle> {
        self.current.as_ref()
    }

    /// Re-mount the current step (navigating back to its form).
    pub async fn mount_current(&mut self) -> Result<(), SetupError> {
        let Some(lifecycle) = self.current.as_mut() else {
            return Err(SetupError::NoActiveStep);
        };
        lifecycle.mount(&self.ctx, &self.events).await
    }

    /// Submit form data for the current step. On completion the wizard
    /// advances to the next active, not-yet-completed step.
    pub async fn submit(&mut self, form: Value) -> Result<SubmitOutcome, SetupError> {
        let Some(lifecycle) = self.current.as_mut() else {
            return Err(SetupError::NoActiveStep);
        };

        let outcome = lifecycle.submit(&mut self.ctx, &self.events, form).await?;

        if matches!(outcome, SubmitOutcome::Completed) {
            self.advance().await?;
        }

        Ok(outcome)
    }

    /// Recompute the active sequence against a fresh staged snapshot and
    /// mount the first step not yet completed. Steps whose display predicate
    /// turned false are skipped entirely.
    async fn advance(&mut self) -> Result<(), SetupError> {
        let snapshot = self
            .ctx
            .staged()
            .snapshot()
            .await
            .map_err(SetupError::session)?;

        let next = self
            .registry
            .active_sequence(&snapshot)
            .into_iter()
            .find(|d| !self.ctx.state().is_completed(d.id()));

        match next {
            Some(descriptor) => {
                let step_id = descriptor.id().to_string();
                let handler = self.registry.handler(&step_id)?;

                let mut lifecycle = StepLifecycle::new(
                    descriptor,
                    handler,
                    self.config.external_call_timeout(),
                );
                lifecycle.mount(&self.ctx, &self.events).await?;

                self.ctx.state_mut().current_step = Some(step_id);
                self.ctx.persist_state().await.map_err(SetupError::session)?;
                self.current = Some(lifecycle);
            }
            None => {
                info!(
                    "[PHASE: wizard] [STEP: advance] All steps visited; ready to commit (run_id={})",
                    self.ctx.run_id()
                );
                self.ctx.state_mut().current_step = None;
                self.ctx.persist_state().await.map_err(SetupError::session)?;
                self.current = None;
            }
        }

        Ok(())
    }

    /// Evaluate the configured environment requirements.
    pub fn check_requirements(&self, runtime_version: &str) -> RequirementReport {
        RequirementChecker::new(self.config.clone()).check_all(runtime_version)
    }

    /// Run the commit phase against `store`.
    pub async fn install(
        &mut self,
        store: Arc<dyn PermanentStore>,
        introspector: &SchemaIntrospector,
        opts: &InstallOptions,
    ) -> Result<InstallationResult, SetupError> {
        let manager = InstallationManager::new(self.config.clone(), store);
        manager
            .execute(&mut self.ctx, &self.registry, introspector, &self.events, opts)
            .await
    }
}
