// Error taxonomy for the setup engine
//
// Configuration and state errors abort the call that raised them. Everything a
// user can fix by editing a form travels as data (`ValidationResult`), and
// commit failures travel inside `InstallationResult`; neither is ever
// surfaced through this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    /// A plugin tried to register a step id that is already taken.
    #[error("step '{0}' is already registered")]
    DuplicateStep(String),

    /// Lookup of a step id that was never registered.
    #[error("step '{0}' is not registered")]
    StepNotFound(String),

    /// A registered step depends on an id no plugin ever registered.
    /// Reported when the registry is verified at startup, not at runtime.
    #[error("step '{step}' depends on unregistered step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// The configured step-order list names an id that was never registered.
    #[error("configured step '{0}' is not registered")]
    MissingConfiguredStep(String),

    /// A field rule string failed to parse at descriptor-build time.
    #[error("invalid rule '{rule}' on field '{field}': {reason}")]
    InvalidRule {
        field: String,
        rule: String,
        reason: String,
    },

    /// Configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Config(String),

    /// Re-entry into a finalized run without the development override.
    #[error("installation is already finalized; set dev_override to re-enter setup")]
    AlreadyFinalized,

    /// A lifecycle method was called from a state that does not permit it.
    #[error("cannot {action} while step '{step}' is {state}")]
    InvalidTransition {
        step: String,
        state: &'static str,
        action: &'static str,
    },

    /// A wizard operation that needs an active step was called with none.
    #[error("no active step; the wizard is either not entered or ready to commit")]
    NoActiveStep,

    /// A step's execute hook timed out or its collaborator was unreachable.
    /// Mapped to a `Failed` lifecycle transition, never an unhandled fault.
    #[error("external call failed during step '{step}': {message}")]
    ExternalCall { step: String, message: String },

    /// Schema migration or a permanent-storage write failed mid-commit.
    /// Always folded into the `InstallationResult`, never returned raw.
    #[error("commit failed during {stage}: {message}")]
    Commit { stage: String, message: String },

    /// The session-like backing store misbehaved.
    #[error("session store failure: {0:#}")]
    Session(anyhow::Error),
}

impl SetupError {
    /// Wrap a backend error from the session-like store.
    pub fn session(err: anyhow::Error) -> Self {
        SetupError::Session(err)
    }
}
