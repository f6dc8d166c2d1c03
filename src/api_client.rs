// src/api_client.rs
//! Client for the escrow trading service
//! Fetches contracts and signals confirmation, payment and cancellation.
//! Retries are left to the caller's polling cadence.

use async_trait::async_trait;
use bech32::{FromBase32, Variant};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::contract::{Contract, ContractId, FetchedContract};
use crate::error::ApiError;

pub const DEFAULT_BASE_URL: &str = "https://hodlhodl.com";

const SEGWIT_HRPS: [&str; 3] = ["bc", "tb", "bcrt"];
// mainnet and testnet P2PKH / P2SH
const BASE58_VERSIONS: [u8; 4] = [0x00, 0x05, 0x6f, 0xc4];

/// API key for the escrow service
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential(String);

impl ApiCredential {
    pub fn new(key: impl Into<String>) -> Result<Self, ApiError> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(ApiError::InvalidCredential);
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(***)")
    }
}

/// Remote operations the contract tracker depends on
#[async_trait]
pub trait EscrowApi: Send + Sync {
    async fn get_contract(&self, id: &ContractId) -> Result<FetchedContract, ApiError>;

    /// Local check that the reported escrow address is the one this
    /// contract should use. Never touches the network.
    fn verify_escrow_address(&self, contract: &Contract) -> bool;

    async fn mark_contract_as_confirmed(&self, id: &ContractId) -> Result<(), ApiError>;

    async fn mark_contract_as_paid(&self, id: &ContractId) -> Result<(), ApiError>;

    async fn cancel_contract(&self, id: &ContractId) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    contract: Option<serde_json::Value>,
}

pub struct HodlHodlClient {
    base_url: String,
    client: reqwest::Client,
}

impl HodlHodlClient {
    pub fn new(
        base_url: &str,
        credential: &ApiCredential,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|_| ApiError::InvalidCredential)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn contract_url(&self, id: &ContractId) -> String {
        format!("{}/api/v1/contracts/{}", self.base_url, id)
    }

    async fn signal(&self, id: &ContractId, action: &str) -> Result<(), ApiError> {
        let url = format!("{}/{}", self.contract_url(id), action);
        debug!("POST {}", url);

        let response = self.client.post(&url).send().await?;
        Self::read_envelope(&url, response).await?;

        Ok(())
    }

    async fn read_envelope(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<Envelope, ApiError> {
        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<Envelope>(&body);

        if let Ok(envelope) = &parsed {
            if envelope.status == "error" {
                return Err(ApiError::Remote {
                    code: envelope.error_code.clone(),
                    message: envelope
                        .message
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }

        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        Ok(parsed?)
    }
}

#[async_trait]
impl EscrowApi for HodlHodlClient {
    async fn get_contract(&self, id: &ContractId) -> Result<FetchedContract, ApiError> {
        let url = self.contract_url(id);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let envelope = Self::read_envelope(&url, response).await?;

        let payload = envelope.contract.ok_or_else(|| ApiError::Remote {
            code: None,
            message: format!("response for contract {} has no contract", id),
        })?;

        Ok(FetchedContract::from_value(payload)?)
    }

    // The 2-of-3 multisig derivation is not reproduced here; the address is
    // only checked for being a valid Bitcoin address, checksum included.
    fn verify_escrow_address(&self, contract: &Contract) -> bool {
        contract
            .escrow_address()
            .map(is_well_formed_address)
            .unwrap_or(false)
    }

    async fn mark_contract_as_confirmed(&self, id: &ContractId) -> Result<(), ApiError> {
        self.signal(id, "confirm").await
    }

    async fn mark_contract_as_paid(&self, id: &ContractId) -> Result<(), ApiError> {
        self.signal(id, "mark_as_paid").await
    }

    async fn cancel_contract(&self, id: &ContractId) -> Result<(), ApiError> {
        self.signal(id, "cancel").await
    }
}

/// Base58check (P2PKH/P2SH) or segwit bech32/bech32m, checksum verified
fn is_well_formed_address(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    if let Some((hrp, _)) = lower.rsplit_once('1') {
        if SEGWIT_HRPS.contains(&hrp) {
            return is_segwit_address(address);
        }
    }

    match bs58::decode(address).with_check(None).into_vec() {
        Ok(payload) => payload.len() == 21 && BASE58_VERSIONS.contains(&payload[0]),
        Err(_) => false,
    }
}

fn is_segwit_address(address: &str) -> bool {
    let Ok((_, data, variant)) = bech32::decode(address) else {
        return false;
    };
    let Some((version, program)) = data.split_first() else {
        return false;
    };
    let Ok(program) = Vec::<u8>::from_base32(program) else {
        return false;
    };

    match version.to_u8() {
        0 => variant == Variant::Bech32 && matches!(program.len(), 20 | 32),
        1..=16 => variant == Variant::Bech32m && (2..=40).contains(&program.len()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves a single canned HTTP response and returns the raw request head
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    fn client(base_url: &str) -> HodlHodlClient {
        let credential = ApiCredential::new("secret-key").unwrap();
        HodlHodlClient::new(base_url, &credential, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_contract_sends_bearer_token() {
        let body = json!({
            "status": "success",
            "contract": {
                "id": "c1",
                "status": "in_progress",
                "your_role": "buyer",
                "volume": "0.5",
                "asset_code": "BTC",
                "currency_code": "USD",
                "price": "9000",
                "confirmations": 2,
                "escrow": { "address": "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", "confirmations": 3, "amount_deposited": "0.5" }
            }
        })
        .to_string();
        let (url, server) = serve_once("200 OK", body).await;

        let fetched = client(&url).get_contract(&ContractId::from("c1")).await.unwrap();
        let request = server.await.unwrap();

        let FetchedContract::Live(contract) = fetched else {
            panic!("expected a live contract");
        };
        assert!(request.starts_with("GET /api/v1/contracts/c1 "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret-key"));
        assert_eq!(contract.id, ContractId::from("c1"));
        assert!(contract.status.is_in_progress());
    }

    #[tokio::test]
    async fn test_error_envelope_maps_to_remote_error() {
        let body = json!({
            "status": "error",
            "error_code": "not_found",
            "message": "Contract not found"
        })
        .to_string();
        let (url, server) = serve_once("404 Not Found", body).await;

        let err = client(&url)
            .get_contract(&ContractId::from("missing"))
            .await
            .unwrap_err();
        server.await.unwrap();

        match err {
            ApiError::Remote { code, message } => {
                assert_eq!(code.as_deref(), Some("not_found"));
                assert_eq!(message, "Contract not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_failure_maps_to_status_error() {
        let (url, server) = serve_once("502 Bad Gateway", "upstream down".to_string()).await;

        let err = client(&url)
            .mark_contract_as_paid(&ContractId::from("c1"))
            .await
            .unwrap_err();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /api/v1/contracts/c1/mark_as_paid "));
        assert!(matches!(err, ApiError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_malformed_contract_is_parse_error() {
        let body = json!({
            "status": "success",
            "contract": { "id": "c1", "status": "in_progress" }
        })
        .to_string();
        let (url, server) = serve_once("200 OK", body).await;

        let err = client(&url).get_contract(&ContractId::from("c1")).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, ApiError::Parse(_)));
    }

    #[tokio::test]
    async fn test_bare_canceled_contract_is_classified() {
        let body = json!({
            "status": "success",
            "contract": { "id": "c2", "status": "canceled" }
        })
        .to_string();
        let (url, server) = serve_once("200 OK", body).await;

        let fetched = client(&url).get_contract(&ContractId::from("c2")).await.unwrap();
        server.await.unwrap();

        assert_eq!(fetched, FetchedContract::Canceled(ContractId::from("c2")));
    }

    #[tokio::test]
    async fn test_cancel_hits_cancel_endpoint() {
        let body = json!({ "status": "success" }).to_string();
        let (url, server) = serve_once("200 OK", body).await;

        client(&url).cancel_contract(&ContractId::from("c9")).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /api/v1/contracts/c9/cancel "));
    }

    #[test]
    fn test_credential_rejects_blank_and_hides_key() {
        assert!(ApiCredential::new("   ").is_err());
        let credential = ApiCredential::new("top-secret").unwrap();
        assert!(!format!("{:?}", credential).contains("top-secret"));
    }

    #[test]
    fn test_address_format() {
        assert!(is_well_formed_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(is_well_formed_address(
            "bc1p5d7rjq7g6rdk2yhzks9smlaqtedr4dekq08ge8ztwac72sfr9rusxg3297"
        ));
        assert!(is_well_formed_address("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"));
        assert!(is_well_formed_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        assert!(!is_well_formed_address("addr1"));
        assert!(!is_well_formed_address("bc1qAr0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(!is_well_formed_address("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNL0"));
        assert!(!is_well_formed_address(""));
    }

    #[test]
    fn test_single_typo_fails_checksum() {
        assert!(!is_well_formed_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdp"));
        assert!(!is_well_formed_address("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLz"));
        assert!(!is_well_formed_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb"));
    }
}
