// Step lifecycle state machine
//
// Drives one step instance through mount -> render -> validate -> execute ->
// advance. Validation failures and execute-hook faults both land in a
// `Failed` state that carries the ValidationResult and accepts a corrected
// resubmission; nothing recoverable escapes as an Err.

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::context::RunContext;
use crate::errors::SetupError;
use crate::events::{EventBus, InstallEvent};
use crate::models::{StepDescriptor, ValidationResult};
use crate::validation::StepValidator;

/// A step's domain-specific execute hook. Whatever it returns is staged
/// under the step's namespace; the engine itself never interprets it.
///
/// Hooks that reach external collaborators run under the configured timeout
/// and are treated as synchronous, blocking calls by the lifecycle.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &RunContext,
        form: &Map<String, Value>,
    ) -> anyhow::Result<Value>;
}

/// Default handler: stage the validated form data as-is.
pub struct StageFormHandler;

#[async_trait]
impl StepHandler for StageFormHandler {
    async fn execute(
        &self,
        _ctx: &RunContext,
        form: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        Ok(Value::Object(form.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Mounted,
    AwaitingInput,
    Validating,
    Failed,
    Executing,
    Completed,
}

impl StepState {
    fn name(&self) -> &'static str {
        match self {
            StepState::Mounted => "mounted",
            StepState::AwaitingInput => "awaiting_input",
            StepState::Validating => "validating",
            StepState::Failed => "failed",
            StepState::Executing => "executing",
            StepState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Completed,
    /// Validation or execution failed; the attached result says why. The
    /// lifecycle is back at awaiting-input and accepts a resubmission.
    Invalid(ValidationResult),
}

pub struct StepLifecycle {
    descriptor: Arc<StepDescriptor>,
    handler: Arc<dyn StepHandler>,
    state: StepState,
    form: Map<String, Value>,
    last_failure: Option<ValidationResult>,
    timeout: Duration,
}

impl StepLifecycle {
    pub fn new(
        descriptor: Arc<StepDescriptor>,
        handler: Arc<dyn StepHandler>,
        timeout: Duration,
    ) -> Self {
        StepLifecycle {
            descriptor,
            handler,
            state: StepState::Mounted,
            form: Map::new(),
            last_failure: None,
            timeout,
        }
    }

    pub fn descriptor(&self) -> &StepDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Working form state, pre-filled from staged data at mount.
    pub fn form(&self) -> &Map<String, Value> {
        &self.form
    }

    pub fn last_failure(&self) -> Option<&ValidationResult> {
        self.last_failure.as_ref()
    }

    /// Load previously staged data for this step into working form state and
    /// move to awaiting-input. Idempotent: re-mounting (navigating back)
    /// reloads the same data without side effects.
    pub async fn mount(&mut self, ctx: &RunContext, events: &EventBus) -> Result<(), SetupError> {
        let step_id = self.descriptor.id();

        self.form = ctx
            .staged()
            .namespace_document(step_id)
            .await
            .map_err(SetupError::session)?;

        info!(
            "[PHASE: lifecycle] [STEP: {}] Mounted with {} staged field(s)",
            step_id,
            self.form.len()
        );

        self.state = StepState::AwaitingInput;
        events.emit(&InstallEvent::StepStarted {
            step_id: step_id.to_string(),
            data: Value::Object(self.form.clone()),
        });

        Ok(())
    }

    /// Validate and execute one submission. Returns the outcome as data;
    /// only state misuse (submitting an unmounted or completed step) is an
    /// `Err`.
    pub async fn submit(
        &mut self,
        ctx: &mut RunContext,
        events: &EventBus,
        form: Value,
    ) -> Result<SubmitOutcome, SetupError> {
        let step_id = self.descriptor.id().to_string();

        match self.state {
            StepState::AwaitingInput | StepState::Failed => {}
            state => {
                return Err(SetupError::InvalidTransition {
                    step: step_id,
                    state: state.name(),
                    action: "submit",
                })
            }
        }

        self.state = StepState::Validating;

        let form_map = match form {
            Value::Object(map) => map,
            _ => {
                let mut result = ValidationResult::default();
                result.add_error(&step_id, "submitted form data must be an object");
                return Ok(self.fail(events, &step_id, "malformed submission", result));
            }
        };
        self.form = form_map.clone();

        let mut result = StepValidator::validate_fields(&self.descriptor, &form_map);
        StepValidator::validate_dependencies(
            &self.descriptor,
            &ctx.state().completed_steps,
            &mut result,
        );

        if !result.passed() {
            info!(
                "[PHASE: lifecycle] [STEP: {}] Validation failed with {} error field(s)",
                step_id,
                result.errors().len()
            );
            return Ok(self.fail(events, &step_id, "validation failed", result));
        }

        self.state = StepState::Executing;

        let executed =
            tokio::time::timeout(self.timeout, self.handler.execute(ctx, &form_map)).await;

        let output = match executed {
            Err(_) => {
                let err = SetupError::ExternalCall {
                    step: step_id.clone(),
                    message: format!("timed out after {}s", self.timeout.as_secs()),
                };
                return Ok(self.fail_external(events, &step_id, err));
            }
            Ok(Err(e)) => {
                let err = SetupError::ExternalCall {
                    step: step_id.clone(),
                    message: format!("{:#}", e),
                };
                return Ok(self.fail_external(events, &step_id, err));
            }
            Ok(Ok(output)) => output,
        };

        self.stage_output(ctx, &step_id, &output)
            .await
            .map_err(SetupError::session)?;

        ctx.state_mut().mark_completed(&step_id);
        ctx.persist_state().await.map_err(SetupError::session)?;

        self.state = StepState::Completed;
        self.last_failure = None;

        info!("[PHASE: lifecycle] [STEP: {}] Completed", step_id);
        events.emit(&InstallEvent::StepCompleted {
            step_id,
            data: output,
        });

        Ok(SubmitOutcome::Completed)
    }

    /// Stage the execute hook's output under this step's namespace. Objects
    /// are staged entry-per-key so later steps can address single fields;
    /// anything else lands under a single "value" key.
    async fn stage_output(
        &self,
        ctx: &RunContext,
        step_id: &str,
        output: &Value,
    ) -> anyhow::Result<()> {
        match output {
            Value::Object(map) => {
                for (k, v) in map {
                    ctx.staged().put(step_id, k, v.clone()).await?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => ctx.staged().put(step_id, "value", other.clone()).await,
        }
    }

    fn fail(
        &mut self,
        events: &EventBus,
        step_id: &str,
        reason: &str,
        result: ValidationResult,
    ) -> SubmitOutcome {
        self.state = StepState::Failed;
        events.emit(&InstallEvent::StepFailed {
            step_id: step_id.to_string(),
            error: reason.to_string(),
            data: Value::Object(self.form.clone()),
        });
        self.last_failure = Some(result.clone());
        SubmitOutcome::Invalid(result)
    }

    fn fail_external(
        &mut self,
        events: &EventBus,
        step_id: &str,
        err: SetupError,
    ) -> SubmitOutcome {
        warn!(
            "[PHASE: lifecycle] [STEP: {}] Execute hook failed: {}",
            step_id, err
        );
        let mut result = ValidationResult::default();
        result.add_error(step_id, err.to_string());
        self.fail(events, step_id, "execution failed", result)
    }
}
