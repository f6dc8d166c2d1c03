// src/lib.rs
//! Escrow contract tracker
//!
//! Keeps the user's peer-to-peer escrow contracts in sync with the escrow
//! trading service: polls every known contract, verifies and confirms escrow
//! addresses, derives whether the escrow is funded, and runs the pay/cancel
//! transitions the user asks for.

pub mod actions;
pub mod api_client;
pub mod config;
pub mod contract;
pub mod database;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod session;
pub mod synchronizer;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use actions::{available_actions, ActionGuard, ActionOutcome, ConfirmationPrompt, ContractAction, PromptRequest};
pub use api_client::{ApiCredential, EscrowApi, HodlHodlClient};
pub use config::AppConfig;
pub use contract::{Contract, ContractId, ContractStatus, Escrow, EscrowState, FetchedContract, Role};
pub use database::{ContractStore, CredentialProvider, StaticCredential, WalletDatabase};
pub use error::{ActionError, ApiError, SessionError, StoreError, SyncError};
pub use resolver::{ContractResolver, Resolution};
pub use session::{ContractsSession, SessionOptions};
pub use synchronizer::{ContractSynchronizer, CycleReport, SyncLoop, SyncState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
