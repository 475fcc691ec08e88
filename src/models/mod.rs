// Engine data models

mod descriptor;
mod results;
mod run_state;

pub use descriptor::{DisplayPredicate, StepDescriptor};
pub use results::{InstallStatus, InstallationResult, SkippedRule, ValidationResult};
pub use run_state::RunState;
