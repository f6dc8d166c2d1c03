// src/testing.rs
//! In-memory collaborators for unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::actions::{ConfirmationPrompt, PromptRequest};
use crate::api_client::EscrowApi;
use crate::contract::{Contract, ContractId, ContractStatus, FetchedContract};
use crate::database::ContractStore;
use crate::error::{ApiError, StoreError};

/// Builds a contract from a partial payload on top of sane defaults
pub fn contract_json(overrides: Value) -> Contract {
    let mut base = json!({
        "id": "c0",
        "status": "pending",
        "your_role": "buyer",
        "volume": "0.5",
        "asset_code": "BTC",
        "currency_code": "USD",
        "price": "9000",
        "confirmations": 1,
        "can_be_canceled": false,
    });

    if let (Some(map), Value::Object(extra)) = (base.as_object_mut(), overrides) {
        for (key, value) in extra {
            map.insert(key, value);
        }
    }

    serde_json::from_value(base).expect("valid contract fixture")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    GetContract(String),
    Confirm(String),
    Paid(String),
    Cancel(String),
}

/// Holds wire payloads so fetches go through the same classification as the
/// real client
pub struct MockApi {
    contracts: Mutex<HashMap<ContractId, Value>>,
    failing: Mutex<HashSet<ContractId>>,
    failing_confirm: Mutex<HashSet<ContractId>>,
    verification: AtomicBool,
    fail_actions: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            contracts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            failing_confirm: Mutex::new(HashSet::new()),
            verification: AtomicBool::new(true),
            fail_actions: AtomicBool::new(false),
            fetch_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, contract: Contract) {
        let payload = serde_json::to_value(&contract).expect("serializable contract");
        self.contracts.lock().unwrap().insert(contract.id, payload);
    }

    /// Stores a payload exactly as the service would send it
    pub fn insert_raw(&self, payload: Value) {
        let id = payload["id"].as_str().expect("payload id").to_string();
        self.contracts.lock().unwrap().insert(ContractId::new(id), payload);
    }

    pub fn set_verification(&self, result: bool) {
        self.verification.store(result, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, id: &str) {
        self.failing.lock().unwrap().insert(ContractId::from(id));
    }

    pub fn fail_confirm(&self, id: &str) {
        self.failing_confirm.lock().unwrap().insert(ContractId::from(id));
    }

    pub fn fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.count(|call| matches!(call, ApiCall::GetContract(c) if c == id))
    }

    pub fn confirm_count(&self, id: &str) -> usize {
        self.count(|call| matches!(call, ApiCall::Confirm(c) if c == id))
    }

    fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn action_result(&self, id: &ContractId, status: ContractStatus) -> Result<(), ApiError> {
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(ApiError::Remote {
                code: Some("invalid_state".to_string()),
                message: format!("contract {} cannot change state", id),
            });
        }

        if let Some(payload) = self.contracts.lock().unwrap().get_mut(id) {
            payload["status"] = Value::String(status.as_str().to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl EscrowApi for MockApi {
    async fn get_contract(&self, id: &ContractId) -> Result<FetchedContract, ApiError> {
        self.record(ApiCall::GetContract(id.to_string()));

        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(id) {
            return Err(ApiError::Remote {
                code: Some("server_error".to_string()),
                message: format!("failed to fetch {}", id),
            });
        }

        let payload = self
            .contracts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::Remote {
                code: Some("not_found".to_string()),
                message: format!("contract {} not found", id),
            })?;

        Ok(FetchedContract::from_value(payload)?)
    }

    fn verify_escrow_address(&self, _contract: &Contract) -> bool {
        self.verification.load(Ordering::SeqCst)
    }

    async fn mark_contract_as_confirmed(&self, id: &ContractId) -> Result<(), ApiError> {
        self.record(ApiCall::Confirm(id.to_string()));

        if self.failing_confirm.lock().unwrap().contains(id) {
            return Err(ApiError::Status {
                endpoint: format!("/api/v1/contracts/{}/confirm", id),
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(())
    }

    async fn mark_contract_as_paid(&self, id: &ContractId) -> Result<(), ApiError> {
        self.record(ApiCall::Paid(id.to_string()));
        self.action_result(id, ContractStatus::Paid)
    }

    async fn cancel_contract(&self, id: &ContractId) -> Result<(), ApiError> {
        self.record(ApiCall::Cancel(id.to_string()));
        self.action_result(id, ContractStatus::Canceled)
    }
}

#[derive(Default)]
pub struct MockStore {
    ids: Mutex<Vec<ContractId>>,
    fail_listing: AtomicBool,
}

impl MockStore {
    pub fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|id| ContractId::from(*id)).collect()),
            fail_listing: AtomicBool::new(false),
        }
    }

    pub fn ids(&self) -> Vec<ContractId> {
        self.ids.lock().unwrap().clone()
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContractStore for MockStore {
    async fn list_contract_ids(&self) -> Result<Vec<ContractId>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(self.ids())
    }

    async fn add_contract_id(&self, id: &ContractId) -> Result<(), StoreError> {
        let mut ids = self.ids.lock().unwrap();
        if !ids.contains(id) {
            ids.push(id.clone());
        }
        Ok(())
    }

    async fn remove_contract_id(&self, id: &ContractId) -> Result<(), StoreError> {
        self.ids.lock().unwrap().retain(|existing| existing != id);
        Ok(())
    }
}

/// Answers every prompt the same way and counts how often it was asked
pub struct MockPrompt {
    answer: bool,
    asked: AtomicUsize,
}

impl MockPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationPrompt for MockPrompt {
    async fn confirm(&self, _request: &PromptRequest) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
