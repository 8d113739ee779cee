//! Attestation client for the cross-chain gateway.
//!
//! Builds and signs burn intents, submits them to the gateway's attestation
//! service, and returns the attestation + signature pair consumed by the
//! destination-chain settlement call. Stateless across calls: nothing is
//! retained beyond a single request/response round trip.

use alloy::primitives::{Address, Signature, U256};
use serde::{Deserialize, Serialize};

use crate::constants::{EXPIRY_BUFFER_BLOCKS, GATEWAY_API_MAINNET, GATEWAY_API_TESTNET};
use crate::eip712;
use crate::error::InvoiceError;
use crate::ledger::GatewayAttestation;
use crate::BurnIntent;

/// One supported network in the gateway's `/v1/info` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDomain {
    pub domain: u64,
    #[serde(default)]
    pub burn_intent_expiration_height: Option<String>,
    #[serde(default)]
    pub usdc_contract_address: Option<String>,
}

/// Parsed `/v1/info` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    #[serde(default)]
    pub domains: Vec<GatewayDomain>,
}

impl GatewayInfo {
    fn domain(&self, chain: u64) -> Option<&GatewayDomain> {
        self.domains.iter().find(|d| d.domain == chain)
    }
}

/// Wire form of a burn intent as the gateway API expects it: chain ids as
/// numbers, amounts and heights as decimal strings, nonce as hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnIntentWire {
    pub source_signer: Address,
    pub source_chain: u64,
    pub destination_chain: u64,
    pub destination_recipient: Address,
    pub amount: String,
    pub max_block_height: String,
    pub nonce: alloy::primitives::B256,
}

impl From<&BurnIntent> for BurnIntentWire {
    fn from(intent: &BurnIntent) -> Self {
        Self {
            source_signer: intent.sourceSigner,
            source_chain: intent.sourceChain.saturating_to(),
            destination_chain: intent.destinationChain.saturating_to(),
            destination_recipient: intent.destinationRecipient,
            amount: intent.amount.to_string(),
            max_block_height: intent.maxBlockHeight.to_string(),
            nonce: intent.nonce,
        }
    }
}

impl BurnIntentWire {
    /// Decode back into the EIP-712 struct, e.g. to re-verify a signature.
    pub fn to_intent(&self) -> Result<BurnIntent, InvoiceError> {
        let amount: U256 = self
            .amount
            .parse()
            .map_err(|e| InvoiceError::BadAttestation(format!("invalid amount: {e}")))?;
        let max_block_height: U256 = self
            .max_block_height
            .parse()
            .map_err(|e| InvoiceError::BadAttestation(format!("invalid maxBlockHeight: {e}")))?;
        Ok(BurnIntent {
            sourceSigner: self.source_signer,
            sourceChain: U256::from(self.source_chain),
            destinationChain: U256::from(self.destination_chain),
            destinationRecipient: self.destination_recipient,
            amount,
            maxBlockHeight: max_block_height,
            nonce: self.nonce,
        })
    }
}

/// Bound applied to every gateway round trip. Attestation has no
/// server-side retry guarantee; the caller decides whether to restart
/// after a timeout.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// HTTP client for the gateway attestation service.
pub struct GatewayClient {
    http: reqwest::Client,
    api_url: String,
}

impl GatewayClient {
    /// Client against a custom gateway API base URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    /// Testnet gateway endpoint.
    pub fn testnet() -> Self {
        Self::new(GATEWAY_API_TESTNET)
    }

    /// Mainnet gateway endpoint.
    pub fn mainnet() -> Self {
        Self::new(GATEWAY_API_MAINNET)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    /// Fetch supported networks and per-network expiration heights.
    pub async fn info(&self) -> Result<GatewayInfo, InvoiceError> {
        let resp = self
            .http
            .get(self.url("/v1/info"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| InvoiceError::HttpError(format!("gateway info request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(InvoiceError::HttpError(format!(
                "gateway info returned {}",
                resp.status()
            )));
        }
        resp.json::<GatewayInfo>()
            .await
            .map_err(|e| InvoiceError::HttpError(format!("gateway info parse failed: {e}")))
    }

    /// Construct a burn intent for a cross-chain transfer. Fails fast with
    /// `UnsupportedChain` before anything is signed.
    pub async fn create_burn_intent(
        &self,
        source_signer: Address,
        source_chain: u64,
        destination_chain: u64,
        destination_recipient: Address,
        amount: U256,
    ) -> Result<BurnIntent, InvoiceError> {
        let info = self.info().await?;
        build_burn_intent(
            &info,
            source_signer,
            source_chain,
            destination_chain,
            destination_recipient,
            amount,
        )
    }

    /// Submit a signed burn intent for attestation. Blocking round trip with
    /// no server-side retry guarantee — the request carries the client's
    /// timeout, and callers decide whether to restart from a fresh intent.
    pub async fn request_attestation(
        &self,
        intent: &BurnIntent,
        signature: &Signature,
    ) -> Result<GatewayAttestation, InvoiceError> {
        let body = serde_json::json!({
            "burnIntents": [BurnIntentWire::from(intent)],
            "signatures": [eip712::encode_signature_hex(signature)],
        });

        let resp = self
            .http
            .post(self.url("/v1/transfer"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| InvoiceError::HttpError(format!("attestation request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(InvoiceError::HttpError(format!(
                "attestation request returned {status}: {text}"
            )));
        }

        let attestation: GatewayAttestation = resp
            .json()
            .await
            .map_err(|e| InvoiceError::HttpError(format!("attestation parse failed: {e}")))?;

        tracing::info!(
            signer = %intent.sourceSigner,
            amount = %intent.amount,
            nonce = %format!("{:.8}", intent.nonce),
            "attestation received"
        );
        Ok(attestation)
    }

    /// USDC contract address on a given chain, if the gateway supports it.
    pub async fn usdc_address(&self, chain: u64) -> Result<Option<Address>, InvoiceError> {
        let info = self.info().await?;
        Ok(info
            .domain(chain)
            .and_then(|d| d.usdc_contract_address.as_deref())
            .and_then(|s| s.parse().ok()))
    }
}

/// Rough source-chain finality times in seconds, used to estimate when a
/// cross-chain transfer will land. The gateway itself settles within about
/// a second once the source chain is final.
pub fn estimate_transfer_secs(source_chain: u64) -> u64 {
    let finality = match source_chain {
        1 => 900,
        137 => 180,
        8453 => 60,
        11155111 => 60,
        crate::constants::ARC_CHAIN_ID => 1,
        _ => 300,
    };
    finality + 1
}

/// Pure construction step, split out from the HTTP round trip.
///
/// `maxBlockHeight` is the gateway-reported expiration height for the
/// source network plus [`EXPIRY_BUFFER_BLOCKS`]; the nonce is a fresh
/// CSPRNG value, unique per intent.
pub fn build_burn_intent(
    info: &GatewayInfo,
    source_signer: Address,
    source_chain: u64,
    destination_chain: u64,
    destination_recipient: Address,
    amount: U256,
) -> Result<BurnIntent, InvoiceError> {
    if amount.is_zero() {
        return Err(InvoiceError::Validation(
            "transfer amount must be greater than zero".to_string(),
        ));
    }
    let domain = info
        .domain(source_chain)
        .ok_or(InvoiceError::UnsupportedChain(source_chain))?;

    let expiration_height: u64 = domain
        .burn_intent_expiration_height
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|e| {
            InvoiceError::HttpError(format!("gateway reported malformed expiration height: {e}"))
        })?;

    Ok(BurnIntent {
        sourceSigner: source_signer,
        sourceChain: U256::from(source_chain),
        destinationChain: U256::from(destination_chain),
        destinationRecipient: destination_recipient,
        amount,
        maxBlockHeight: U256::from(expiration_height.saturating_add(EXPIRY_BUFFER_BLOCKS)),
        nonce: eip712::random_nonce(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> GatewayInfo {
        GatewayInfo {
            domains: vec![
                GatewayDomain {
                    domain: 11155111,
                    burn_intent_expiration_height: Some("8123456".to_string()),
                    usdc_contract_address: Some(
                        "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238".to_string(),
                    ),
                },
                GatewayDomain {
                    domain: crate::constants::ARC_CHAIN_ID,
                    burn_intent_expiration_height: Some("42".to_string()),
                    usdc_contract_address: None,
                },
            ],
        }
    }

    #[test]
    fn test_build_intent_adds_expiry_buffer() {
        let intent = build_burn_intent(
            &sample_info(),
            Address::repeat_byte(0xaa),
            11155111,
            crate::constants::ARC_CHAIN_ID,
            Address::repeat_byte(0xbb),
            U256::from(500_000u64),
        )
        .unwrap();

        assert_eq!(
            intent.maxBlockHeight,
            U256::from(8_123_456u64 + EXPIRY_BUFFER_BLOCKS)
        );
        assert_eq!(intent.sourceChain, U256::from(11155111u64));
    }

    #[test]
    fn test_build_intent_saturates_on_hostile_expiration_height() {
        let info = GatewayInfo {
            domains: vec![GatewayDomain {
                domain: 11155111,
                burn_intent_expiration_height: Some(u64::MAX.to_string()),
                usdc_contract_address: None,
            }],
        };
        let intent = build_burn_intent(
            &info,
            Address::repeat_byte(0xaa),
            11155111,
            crate::constants::ARC_CHAIN_ID,
            Address::repeat_byte(0xbb),
            U256::from(1u64),
        )
        .unwrap();
        assert_eq!(intent.maxBlockHeight, U256::from(u64::MAX));
    }

    #[test]
    fn test_build_intent_unsupported_chain() {
        let err = build_burn_intent(
            &sample_info(),
            Address::repeat_byte(0xaa),
            999,
            crate::constants::ARC_CHAIN_ID,
            Address::repeat_byte(0xbb),
            U256::from(1u64),
        )
        .unwrap_err();
        assert!(matches!(err, InvoiceError::UnsupportedChain(999)));
    }

    #[test]
    fn test_build_intent_rejects_zero_amount() {
        let err = build_burn_intent(
            &sample_info(),
            Address::repeat_byte(0xaa),
            11155111,
            crate::constants::ARC_CHAIN_ID,
            Address::repeat_byte(0xbb),
            U256::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, InvoiceError::Validation(_)));
    }

    #[test]
    fn test_nonces_unique_per_intent() {
        let build = || {
            build_burn_intent(
                &sample_info(),
                Address::repeat_byte(0xaa),
                11155111,
                crate::constants::ARC_CHAIN_ID,
                Address::repeat_byte(0xbb),
                U256::from(1u64),
            )
            .unwrap()
        };
        assert_ne!(build().nonce, build().nonce);
    }

    #[test]
    fn test_wire_roundtrip() {
        let intent = build_burn_intent(
            &sample_info(),
            Address::repeat_byte(0xaa),
            11155111,
            crate::constants::ARC_CHAIN_ID,
            Address::repeat_byte(0xbb),
            U256::from(500_000u64),
        )
        .unwrap();

        let wire = BurnIntentWire::from(&intent);
        let back = wire.to_intent().unwrap();
        assert_eq!(back.sourceSigner, intent.sourceSigner);
        assert_eq!(back.amount, intent.amount);
        assert_eq!(back.maxBlockHeight, intent.maxBlockHeight);
        assert_eq!(back.nonce, intent.nonce);

        // Wire JSON uses camelCase field names.
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("maxBlockHeight").is_some());
        assert!(json.get("sourceSigner").is_some());
    }

    #[test]
    fn test_estimate_transfer_secs() {
        assert_eq!(estimate_transfer_secs(1), 901);
        assert_eq!(estimate_transfer_secs(crate::constants::ARC_CHAIN_ID), 2);
        assert_eq!(estimate_transfer_secs(424242), 301);
    }
}
