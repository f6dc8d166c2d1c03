// src/actions.rs
//! User-initiated contract transitions
//!
//! The guard keeps the contract currently open in the detail view. An action
//! runs only when the detail view offers it and the user confirms the
//! prompt. On success the selection is cleared and one refresh cycle runs
//! right away; on failure nothing changes.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::contract::{Contract, Role};
use crate::error::ActionError;
use crate::metrics;
use crate::synchronizer::{ContractSynchronizer, CycleReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractAction {
    MarkAsPaid,
    Cancel,
}

impl ContractAction {
    /// Whether the detail view offers this action for `contract`
    pub fn is_offered(&self, contract: &Contract) -> bool {
        match self {
            // A buyer must not report payment before the contract is in progress
            ContractAction::MarkAsPaid => {
                contract.status.is_in_progress() && contract.your_role == Role::Buyer
            }
            ContractAction::Cancel => contract.can_be_canceled,
        }
    }

    pub fn prompt(&self) -> PromptRequest {
        match self {
            ContractAction::MarkAsPaid => PromptRequest {
                title: "Are you sure you want to mark this contract as paid?".to_string(),
                message: "Do this only if you sent funds to the seller via agreed payment method"
                    .to_string(),
                confirm_label: "Yes".to_string(),
                decline_label: "Cancel".to_string(),
            },
            ContractAction::Cancel => PromptRequest {
                title: "Are you sure you want to cancel this contract?".to_string(),
                message: String::new(),
                confirm_label: "Yes, cancel contract".to_string(),
                decline_label: "No".to_string(),
            },
        }
    }
}

impl fmt::Display for ContractAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractAction::MarkAsPaid => f.write_str("mark as paid"),
            ContractAction::Cancel => f.write_str("cancel"),
        }
    }
}

/// Actions the detail view shows for `contract`, in display order
pub fn available_actions(contract: &Contract) -> Vec<ContractAction> {
    [ContractAction::MarkAsPaid, ContractAction::Cancel]
        .into_iter()
        .filter(|action| action.is_offered(contract))
        .collect()
}

/// Yes/no question shown before an action is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub title: String,
    pub message: String,
    pub confirm_label: String,
    pub decline_label: String,
}

#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, request: &PromptRequest) -> bool;
}

#[derive(Debug)]
pub enum ActionOutcome {
    /// User declined the prompt; nothing was sent
    Declined,
    /// Service accepted the action. `refresh` is `None` when the follow-up
    /// cycle failed.
    Completed { refresh: Option<CycleReport> },
}

pub struct ActionGuard {
    synchronizer: Arc<ContractSynchronizer>,
    selected: Option<Contract>,
}

impl ActionGuard {
    pub fn new(synchronizer: Arc<ContractSynchronizer>) -> Self {
        Self {
            synchronizer,
            selected: None,
        }
    }

    pub fn select(&mut self, contract: Contract) {
        self.selected = Some(contract);
    }

    pub fn dismiss(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Contract> {
        self.selected.as_ref()
    }

    /// `&mut self` keeps a second action from starting while one is pending
    pub async fn perform(
        &mut self,
        action: ContractAction,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<ActionOutcome, ActionError> {
        let contract = self.selected.as_ref().ok_or(ActionError::NoSelection)?;

        if !action.is_offered(contract) {
            return Err(ActionError::NotOffered {
                action,
                id: contract.id.clone(),
            });
        }

        if !prompt.confirm(&action.prompt()).await {
            return Ok(ActionOutcome::Declined);
        }

        let id = contract.id.clone();
        let api = self.synchronizer.resolver().api();
        let result = match action {
            ContractAction::MarkAsPaid => api.mark_contract_as_paid(&id).await,
            ContractAction::Cancel => api.cancel_contract(&id).await,
        };

        if let Err(source) = result {
            metrics::ACTIONS_FAILED.inc();
            warn!("Failed to {} contract {}: {}", action, id, source);
            return Err(ActionError::Remote { action, source });
        }

        metrics::ACTIONS_COMPLETED.inc();
        info!("Contract {}: {} accepted", id, action);
        self.selected = None;

        let refresh = match self.synchronizer.refresh().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Refresh after {} failed: {}", action, e);
                None
            }
        };

        Ok(ActionOutcome::Completed { refresh })
    }

    pub async fn mark_as_paid(
        &mut self,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<ActionOutcome, ActionError> {
        self.perform(ContractAction::MarkAsPaid, prompt).await
    }

    pub async fn cancel(
        &mut self,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<ActionOutcome, ActionError> {
        self.perform(ContractAction::Cancel, prompt).await
    }
}
