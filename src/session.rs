// src/session.rs
//! One "my contracts" session
//!
//! Mounting obtains the API credential, builds the client, runs the first
//! refresh cycle and starts the periodic loop. Teardown stops the loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::actions::{ActionGuard, ActionOutcome, ConfirmationPrompt, ContractAction};
use crate::api_client::{ApiCredential, EscrowApi};
use crate::contract::{Contract, ContractId};
use crate::database::{ContractStore, CredentialProvider};
use crate::error::{ActionError, ApiError, SessionError, SyncError};
use crate::resolver::ContractResolver;
use crate::synchronizer::{
    ContractSynchronizer, CycleReport, SyncLoop, SyncState, DEFAULT_POLL_INTERVAL,
    MIN_POLL_INTERVAL,
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub prune_canceled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            prune_canceled: false,
        }
    }
}

pub struct ContractsSession {
    synchronizer: Arc<ContractSynchronizer>,
    sync_loop: SyncLoop,
    actions: ActionGuard,
}

impl ContractsSession {
    /// Only a missing credential, an unusable client or a poll interval
    /// below `MIN_POLL_INTERVAL` fails the mount; a failed first cycle is
    /// logged and retried by the loop.
    pub async fn mount<F>(
        credentials: &dyn CredentialProvider,
        store: Arc<dyn ContractStore>,
        connect: F,
        options: SessionOptions,
    ) -> Result<Self, SessionError>
    where
        F: FnOnce(&ApiCredential) -> Result<Arc<dyn EscrowApi>, ApiError>,
    {
        if options.poll_interval < MIN_POLL_INTERVAL {
            return Err(SessionError::PollInterval {
                given: options.poll_interval,
                min: MIN_POLL_INTERVAL,
            });
        }

        let credential = credentials
            .api_credential()
            .await
            .map_err(SessionError::Credential)?;
        let api = connect(&credential)?;

        let synchronizer = Arc::new(ContractSynchronizer::new(
            ContractResolver::new(api),
            store,
            options.prune_canceled,
        ));

        match synchronizer.refresh().await {
            Ok(report) => info!(
                "Initial refresh: {} active, {} canceled, {} failed",
                report.active,
                report.canceled.len(),
                report.failed
            ),
            Err(e) => error!("Initial refresh failed: {}", e),
        }

        let sync_loop = SyncLoop::start(synchronizer.clone(), options.poll_interval);
        let actions = ActionGuard::new(synchronizer.clone());

        Ok(Self {
            synchronizer,
            sync_loop,
            actions,
        })
    }

    pub fn state(&self) -> SyncState {
        self.synchronizer.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.synchronizer.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.synchronizer.snapshot().is_loading
    }

    /// Out-of-band refresh, e.g. pull-to-refresh
    pub async fn refresh(&self) -> Result<CycleReport, SyncError> {
        self.synchronizer.refresh().await
    }

    /// Opens the detail view for a contract in the current working set
    pub fn select(&mut self, id: &ContractId) -> Option<&Contract> {
        let contract = self.synchronizer.snapshot().find(id).cloned()?;
        self.actions.select(contract);
        self.actions.selected()
    }

    pub fn dismiss(&mut self) {
        self.actions.dismiss();
    }

    pub fn selected(&self) -> Option<&Contract> {
        self.actions.selected()
    }

    pub async fn perform(
        &mut self,
        action: ContractAction,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<ActionOutcome, ActionError> {
        self.actions.perform(action, prompt).await
    }

    pub async fn mark_as_paid(
        &mut self,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<ActionOutcome, ActionError> {
        self.actions.mark_as_paid(prompt).await
    }

    pub async fn cancel(
        &mut self,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<ActionOutcome, ActionError> {
        self.actions.cancel(prompt).await
    }

    pub async fn teardown(self) {
        self.sync_loop.shutdown().await;
        info!("Contracts session closed");
    }
}
