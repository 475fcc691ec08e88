// Typed wizard configuration
// Assembled once at startup from layered sources (defaults -> optional TOML
// file -> SETUP_-prefixed environment), then passed down explicitly. Nothing
// else in the crate reads the environment.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::SetupError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// Root directory for run-scoped files (session store, master key, marker).
    pub data_dir: PathBuf,

    /// Session store file; defaults to `<data_dir>/session.json`.
    pub session_file: Option<PathBuf>,

    /// Completion marker; defaults to `<data_dir>/.setup-complete`.
    pub completion_marker: Option<PathBuf>,

    /// Cached-configuration file invalidated at the start of a commit.
    pub config_cache_file: Option<PathBuf>,

    /// Permit re-entering an already-finalized run. Non-production use only.
    pub dev_override: bool,

    /// Elevate requirement warnings to failures.
    pub strict_requirements: bool,

    /// Timeout applied to every step execute hook.
    pub external_call_timeout_secs: u64,

    /// Minimum host runtime version, dotted-numeric (e.g. "8.2").
    pub minimum_runtime_version: Option<String>,

    /// The required core step ids. Each must be registered by the time the
    /// registry is verified; ordering stays with (position, registration order).
    pub step_order: Vec<String>,

    /// Requirement name -> executable that must resolve on PATH.
    pub required_capabilities: BTreeMap<String, String>,

    /// Filesystem path -> permission string ("r", "rw").
    pub path_permissions: BTreeMap<String, String>,

    /// Table staged namespaces are reconciled into at commit time.
    pub settings_table: String,

    /// Optional storage symlink created during commit.
    pub storage_link: Option<StorageLinkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageLinkConfig {
    pub target: PathBuf,
    pub link: PathBuf,
}

impl Default for WizardConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("setup-wizard"))
            .unwrap_or_else(|| PathBuf::from(".setup-wizard"));

        WizardConfig {
            data_dir,
            session_file: None,
            completion_marker: None,
            config_cache_file: None,
            dev_override: false,
            strict_requirements: false,
            external_call_timeout_secs: 30,
            minimum_runtime_version: None,
            step_order: Vec::new(),
            required_capabilities: BTreeMap::new(),
            path_permissions: BTreeMap::new(),
            settings_table: "instance_settings".to_string(),
            storage_link: None,
        }
    }
}

impl WizardConfig {
    /// Load configuration: built-in defaults, overridden by `file` when given,
    /// overridden by `SETUP_`-prefixed environment variables
    /// (e.g. `SETUP_DEV_OVERRIDE=true`, `SETUP_STEP_ORDER=welcome,account`).
    pub fn load(file: Option<&Path>) -> Result<Self, SetupError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SETUP")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("step_order"),
        );

        builder
            .build()
            .map_err(|e| SetupError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SetupError::Config(e.to_string()))
    }

    pub fn session_file_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("session.json"))
    }

    pub fn completion_marker_path(&self) -> PathBuf {
        self.completion_marker
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".setup-complete"))
    }

    pub fn master_key_path(&self) -> PathBuf {
        self.data_dir.join("secrets").join("master_key.b64")
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }
}
