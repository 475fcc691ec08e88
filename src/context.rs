// Run context
//
// Explicitly passed object carrying the staging area and run state for one
// install run. Every lifecycle and commit call receives it; there is no
// ambient session access anywhere in the crate.

use anyhow::{Context as _, Result};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::RunState;
use crate::security::SecretProtector;
use crate::staging::{SessionStore, StagedDataStore};

/// Session key the run state is persisted under. Lives outside the staged
/// prefix so clearing staged data does not lose run bookkeeping.
pub const RUN_STATE_KEY: &str = "setup.run.state";

pub struct RunContext {
    run_id: String,
    session: Arc<dyn SessionStore>,
    staged: StagedDataStore,
    state: RunState,
}

impl RunContext {
    /// Open a context over the session store, resuming any persisted run
    /// state from an earlier request of the same install run.
    pub async fn open(
        session: Arc<dyn SessionStore>,
        secrets: Arc<SecretProtector>,
    ) -> Result<Self> {
        let state = match session
            .get(RUN_STATE_KEY)
            .await
            .context("Failed to read run state")?
        {
            Some(raw) => serde_json::from_value(raw).context("Run state is malformed")?,
            None => RunState::default(),
        };

        Ok(RunContext {
            run_id: Uuid::new_v4().simple().to_string(),
            staged: StagedDataStore::new(session.clone(), secrets),
            session,
            state,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn staged(&self) -> &StagedDataStore {
        &self.staged
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    /// Write the current run state through to the session store.
    pub async fn persist_state(&self) -> Result<()> {
        let raw = serde_json::to_value(&self.state).context("Failed to serialize run state")?;
        self.session.put(RUN_STATE_KEY, raw).await
    }

    /// Explicit reset: drop all staged data and start the run over.
    pub async fn reset(&mut self) -> Result<()> {
        self.staged.clear_all().await?;
        self.state = RunState::default();
        self.persist_state().await
    }
}
