// src/resolver.rs
//! Resolves one contract id into the projection shown to the user
//!
//! For each id: fetch, drop canceled contracts, and once the escrow address
//! is known and verifies locally, confirm it to the service and derive the
//! funding flag.

use std::sync::Arc;
use tracing::{debug, info};

use crate::api_client::EscrowApi;
use crate::contract::{Contract, ContractId, FetchedContract};
use crate::error::ApiError;

/// Result of resolving a single id
#[derive(Debug, Clone)]
pub enum Resolution {
    Active(Contract),
    Canceled(ContractId),
}

pub struct ContractResolver {
    api: Arc<dyn EscrowApi>,
}

impl ContractResolver {
    pub fn new(api: Arc<dyn EscrowApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn EscrowApi> {
        &self.api
    }

    pub async fn resolve(&self, id: &ContractId) -> Result<Resolution, ApiError> {
        let mut contract = match self.api.get_contract(id).await? {
            FetchedContract::Live(contract) => contract,
            FetchedContract::Canceled(canceled) => {
                debug!("Contract {} is canceled, skipping", id);
                return Ok(Resolution::Canceled(canceled));
            }
        };

        let verified = contract.escrow_address().is_some()
            && self.api.verify_escrow_address(&contract);

        if verified {
            // Sent on every cycle; the service treats repeats as no-ops
            self.api.mark_contract_as_confirmed(id).await?;

            contract.escrow_confirmed = true;
            contract.is_deposited_enough = Some(contract.deposit_is_sufficient());

            if contract.is_funded() {
                info!("Escrow for contract {} is funded", id);
            }
        }

        Ok(Resolution::Active(contract))
    }
}
