// setup-wizard
// Step-orchestrated setup engine for freshly deployed applications: plugins
// register steps, step data is staged in a session-backed store while no
// permanent storage exists, and a one-time commit phase reconciles
// everything into permanent storage and reports a structured result.

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod install;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod registry;
pub mod requirements;
pub mod schema;
pub mod security;
pub mod staging;
pub mod validation;
pub mod wizard;

pub use config::{StorageLinkConfig, WizardConfig};
pub use context::RunContext;
pub use errors::SetupError;
pub use events::{EventBus, EventListener, InstallEvent};
pub use install::{
    InstallOptions, InstallationManager, MemoryStore, PermanentStore, PostgresStore,
};
pub use lifecycle::{StageFormHandler, StepHandler, StepLifecycle, StepState, SubmitOutcome};
pub use models::{
    InstallStatus, InstallationResult, RunState, StepDescriptor, ValidationResult,
};
pub use registry::StepRegistry;
pub use requirements::{CheckStatus, RequirementChecker, RequirementReport};
pub use schema::{SchemaDefinition, SchemaIntrospector};
pub use security::{generate_app_secret, SecretProtector};
pub use staging::{
    FileSessionStore, MemorySessionStore, SessionStore, StagedDataStore, StagedSnapshot,
};
pub use validation::{parse_rules, strip_store_rules, Rule, StepValidator};
pub use wizard::SetupWizard;
