// src/database.rs
//! Local wallet database
//! FOCUSED: Remember which contracts the user is a party to and the API key.
//! Contract state itself always comes from the escrow service.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

use crate::api_client::ApiCredential;
use crate::contract::ContractId;
use crate::error::StoreError;

const API_KEY_SETTING: &str = "hodlhodl_api_key";

/// Ordered set of contract ids the user participates in
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Ids in the order they were added
    async fn list_contract_ids(&self) -> Result<Vec<ContractId>, StoreError>;

    /// Adding a known id is a no-op
    async fn add_contract_id(&self, id: &ContractId) -> Result<(), StoreError>;

    async fn remove_contract_id(&self, id: &ContractId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn api_credential(&self) -> Result<ApiCredential, StoreError>;
}

/// Credential supplied up front, e.g. from the config file
pub struct StaticCredential(pub String);

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn api_credential(&self) -> Result<ApiCredential, StoreError> {
        ApiCredential::new(self.0.clone()).map_err(|_| StoreError::MissingCredential)
    }
}

#[derive(Clone)]
pub struct WalletDatabase {
    pool: SqlitePool,
}

/// Stored contract id with the time it was added
#[derive(Debug, Clone)]
pub struct TrackedContract {
    pub contract_id: ContractId,
    pub added_at: i64,
}

impl WalletDatabase {
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}", path);
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::create_tables(&pool).await?;

        info!("Wallet database initialized at {}", path);

        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tracked_contracts (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                contract_id TEXT NOT NULL UNIQUE,
                added_at INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn set_api_key(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(API_KEY_SETTING)
            .bind(key.trim())
            .execute(&self.pool)
            .await?;

        info!("Stored escrow service API key");
        Ok(())
    }

    pub async fn api_key(&self) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(API_KEY_SETTING)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.0))
    }

    pub async fn tracked_contracts(&self) -> Result<Vec<TrackedContract>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT contract_id, added_at FROM tracked_contracts ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TrackedContract {
                contract_id: ContractId(r.0),
                added_at: r.1,
            })
            .collect())
    }
}

#[async_trait]
impl ContractStore for WalletDatabase {
    async fn list_contract_ids(&self) -> Result<Vec<ContractId>, StoreError> {
        Ok(self
            .tracked_contracts()
            .await?
            .into_iter()
            .map(|t| t.contract_id)
            .collect())
    }

    async fn add_contract_id(&self, id: &ContractId) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("INSERT OR IGNORE INTO tracked_contracts (contract_id, added_at) VALUES (?, ?)")
            .bind(id.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;

        debug!("Tracking contract {}", id);
        Ok(())
    }

    async fn remove_contract_id(&self, id: &ContractId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tracked_contracts WHERE contract_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        debug!("Stopped tracking contract {}", id);
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for WalletDatabase {
    async fn api_credential(&self) -> Result<ApiCredential, StoreError> {
        let key = self.api_key().await?.ok_or(StoreError::MissingCredential)?;
        ApiCredential::new(key).map_err(|_| StoreError::MissingCredential)
    }
}
