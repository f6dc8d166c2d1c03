// src/error.rs
//! Error definitions

use std::time::Duration;
use thiserror::Error;

use crate::actions::ContractAction;
use crate::contract::ContractId;

/// Failures talking to the escrow service
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("escrow service error: {message}")]
    Remote {
        code: Option<String>,
        message: String,
    },

    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid API credential")]
    InvalidCredential,
}

/// Failures of the local contract id store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no escrow service API key configured")]
    MissingCredential,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to list contract ids: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("no contract selected")]
    NoSelection,

    #[error("{action} is not available for contract {id}")]
    NotOffered { action: ContractAction, id: ContractId },

    #[error("{action} failed: {source}")]
    Remote {
        action: ContractAction,
        #[source]
        source: ApiError,
    },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot obtain API credential: {0}")]
    Credential(#[source] StoreError),

    #[error("cannot construct API client: {0}")]
    Client(#[from] ApiError),

    #[error("poll interval must be at least {min:?}, got {given:?}")]
    PollInterval { given: Duration, min: Duration },
}
