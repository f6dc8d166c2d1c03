// src/contract.rs
//! Contract projection held by the client
//!
//! The escrow service owns every field except `escrow_confirmed` and
//! `is_deposited_enough`, which are derived locally on each refresh cycle
//! and never read from the wire.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const ESCROW_EXPLORER_URL: &str = "https://blockstream.info/address";

/// Contract identifier as issued by the escrow service
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Server-side lifecycle tag. Only `Canceled` and `InProgress` drive
/// client behaviour; the rest are carried for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContractStatus {
    Pending,
    InProgress,
    Paid,
    Completed,
    Disputed,
    Canceled,
    Other(String),
}

impl ContractStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::InProgress => "in_progress",
            ContractStatus::Paid => "paid",
            ContractStatus::Completed => "completed",
            ContractStatus::Disputed => "disputed",
            ContractStatus::Canceled => "canceled",
            ContractStatus::Other(tag) => tag,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ContractStatus::Canceled)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, ContractStatus::InProgress)
    }
}

impl From<String> for ContractStatus {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "pending" => ContractStatus::Pending,
            "in_progress" => ContractStatus::InProgress,
            "paid" => ContractStatus::Paid,
            "completed" => ContractStatus::Completed,
            "disputed" => ContractStatus::Disputed,
            "canceled" => ContractStatus::Canceled,
            _ => ContractStatus::Other(tag),
        }
    }
}

impl From<ContractStatus> for String {
    fn from(status: ContractStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
}

/// On-chain escrow as reported by the service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Escrow {
    /// Null until the counterparty has created the escrow
    #[serde(default)]
    pub address: Option<String>,

    /// Confirmations observed on the deposit
    #[serde(default, deserialize_with = "lenient_number")]
    pub confirmations: u32,

    #[serde(default, deserialize_with = "lenient_number")]
    pub amount_deposited: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentMethodInstruction {
    #[serde(default)]
    pub payment_method_name: Option<String>,

    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VolumeBreakdown {
    #[serde(default, deserialize_with = "optional_number")]
    pub goes_to_buyer: Option<f64>,

    #[serde(default, deserialize_with = "optional_number")]
    pub escrow_fee: Option<f64>,
}

/// One escrow trade the user is a party to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: ContractId,
    pub status: ContractStatus,
    pub your_role: Role,

    #[serde(deserialize_with = "strict_number")]
    pub volume: f64,
    pub asset_code: String,
    pub currency_code: String,
    #[serde(deserialize_with = "strict_number")]
    pub price: f64,

    /// Confirmations the contract terms require before the deposit counts
    #[serde(deserialize_with = "strict_number")]
    pub confirmations: u32,

    #[serde(default)]
    pub escrow: Option<Escrow>,

    #[serde(default)]
    pub can_be_canceled: bool,

    #[serde(default)]
    pub release_address: Option<String>,

    #[serde(default)]
    pub payment_method_instruction: Option<PaymentMethodInstruction>,

    #[serde(default)]
    pub volume_breakdown: Option<VolumeBreakdown>,

    #[serde(default)]
    pub offer_id: Option<String>,

    /// Set when the escrow address was verified and confirmed this cycle
    #[serde(skip)]
    pub escrow_confirmed: bool,

    /// Funding sufficiency; only ever set alongside `escrow_confirmed`
    #[serde(skip)]
    pub is_deposited_enough: Option<bool>,
}

/// Client-observed escrow progress, overlaid on the server status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowState {
    Unconfirmed,
    PendingConfirmation,
    ConfirmedUnderfunded,
    ConfirmedFunded,
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EscrowState::Unconfirmed => "unconfirmed escrow",
            EscrowState::PendingConfirmation => "escrow pending confirmation",
            EscrowState::ConfirmedUnderfunded => "escrow confirmed, underfunded",
            EscrowState::ConfirmedFunded => "escrow confirmed, funded",
        };
        f.write_str(label)
    }
}

impl Contract {
    pub fn escrow_address(&self) -> Option<&str> {
        self.escrow.as_ref().and_then(|e| e.address.as_deref())
    }

    /// Enough confirmations and enough deposited, compared numerically.
    /// Always false while the escrow has no address.
    pub fn deposit_is_sufficient(&self) -> bool {
        match &self.escrow {
            Some(escrow) if escrow.address.is_some() => {
                escrow.confirmations >= self.confirmations
                    && escrow.amount_deposited >= self.volume
            }
            _ => false,
        }
    }

    pub fn is_funded(&self) -> bool {
        self.is_deposited_enough == Some(true)
    }

    pub fn escrow_state(&self) -> EscrowState {
        if self.escrow_address().is_none() {
            EscrowState::Unconfirmed
        } else if !self.escrow_confirmed {
            EscrowState::PendingConfirmation
        } else if self.is_funded() {
            EscrowState::ConfirmedFunded
        } else {
            EscrowState::ConfirmedUnderfunded
        }
    }

    /// List line, e.g. `buying 0.5 BTC (in_progress)`
    pub fn summary(&self) -> String {
        let verb = match self.your_role {
            Role::Buyer => "buying",
            Role::Seller => "selling",
        };
        format!("{} {} {} ({})", verb, self.volume, self.asset_code, self.status)
    }

    pub fn funding_message(&self) -> &'static str {
        if self.is_funded() {
            "Bitcoins are in escrow! Please pay seller via agreed payment method"
        } else {
            "waiting for seller to deposit bitcoins to escrow..."
        }
    }

    pub fn escrow_explorer_url(&self) -> Option<String> {
        self.escrow_address()
            .map(|address| format!("{}/{}", ESCROW_EXPLORER_URL, address))
    }

    pub fn offer_url(&self, base_url: &str) -> Option<String> {
        self.offer_id
            .as_ref()
            .map(|offer| format!("{}/offers/{}", base_url.trim_end_matches('/'), offer))
    }
}

/// A contract payload classified by status before its trade terms are read.
/// The service may send canceled contracts with only `id` and `status`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedContract {
    Live(Contract),
    Canceled(ContractId),
}

#[derive(Deserialize)]
struct ContractHeader {
    id: ContractId,
    status: ContractStatus,
}

impl FetchedContract {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let header = ContractHeader::deserialize(&value)?;
        if header.status.is_canceled() {
            return Ok(FetchedContract::Canceled(header.id));
        }
        Ok(FetchedContract::Live(serde_json::from_value(value)?))
    }

    pub fn id(&self) -> &ContractId {
        match self {
            FetchedContract::Live(contract) => &contract.id,
            FetchedContract::Canceled(id) => id,
        }
    }
}

// ============ Numeric fields ============
//
// The service sends amounts and counts either as JSON numbers or as
// numeric strings. Both parse to the same value; anything else is a
// parse error rather than a silently false comparison later on.

trait Numeric: FromStr + Default {
    fn is_valid(&self) -> bool {
        true
    }
}

impl Numeric for u32 {}

impl Numeric for f64 {
    fn is_valid(&self) -> bool {
        self.is_finite()
    }
}

fn number_from_value<T: Numeric>(value: Value) -> Result<Option<T>, String> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => return Err(format!("expected a number, found {}", other)),
    };

    match text.parse::<T>() {
        Ok(v) if v.is_valid() => Ok(Some(v)),
        _ => Err(format!("invalid numeric value `{}`", text)),
    }
}

fn strict_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Numeric,
{
    let value = Value::deserialize(deserializer)?;
    number_from_value(value)
        .map_err(D::Error::custom)?
        .ok_or_else(|| D::Error::custom("expected a number, found null"))
}

fn lenient_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Numeric,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(value)
        .map_err(D::Error::custom)?
        .unwrap_or_default())
}

fn optional_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Numeric,
{
    let value = Value::deserialize(deserializer)?;
    number_from_value(value).map_err(D::Error::custom)
}
