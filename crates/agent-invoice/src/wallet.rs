//! Wallet / transaction-submission collaborator boundary.
//!
//! Settlement writes go through an external service that accepts a described
//! contract call and returns an opaque transaction handle. The core depends
//! only on the handle and a small lifecycle (queued → sent → confirmed |
//! failed), not on the collaborator's internals. [`ProviderWallet`] is the
//! self-custody implementation backed by an alloy signing provider.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;

use crate::error::InvoiceError;

/// Fee priority hint forwarded to the submission service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl FeeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeLevel::Low => "LOW",
            FeeLevel::Medium => "MEDIUM",
            FeeLevel::High => "HIGH",
        }
    }
}

/// A described contract call: human-readable function signature and
/// parameters for custody services that encode server-side, plus the
/// ABI-encoded calldata for implementations that submit directly.
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub contract: Address,
    /// Canonical ABI signature, e.g. `deposit(string,uint256)`.
    pub function: String,
    /// Display-form parameters, index-aligned with the signature.
    pub parameters: Vec<String>,
    pub fee_level: FeeLevel,
    pub calldata: Bytes,
}

/// Opaque handle for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub id: String,
    /// On-ledger hash, once the submission service has broadcast the call.
    pub tx_hash: Option<TxHash>,
}

impl std::fmt::Display for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Transaction lifecycle as reported by the submission service.
///
/// `Queued` and `Sent` both mean "still pending" — neither is a failure,
/// and a write in either state must not be resubmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Queued,
    Sent,
    Confirmed,
    Failed { reason: String },
}

/// Transaction-submission collaborator.
pub trait WalletService: Send + Sync {
    /// Submit a contract call. Returns once the service has accepted it,
    /// not once it has confirmed.
    fn submit(
        &self,
        call: &ContractCall,
    ) -> impl std::future::Future<Output = Result<TxHandle, InvoiceError>> + Send;

    /// Current lifecycle state of a previously submitted call.
    fn status(
        &self,
        handle: &TxHandle,
    ) -> impl std::future::Future<Output = Result<TxState, InvoiceError>> + Send;
}

/// Poll a submitted transaction until it confirms, fails, or the deadline
/// passes.
///
/// Timing out returns [`InvoiceError::ConfirmationTimeout`] — distinct from
/// failure. The transaction may still land later; callers must re-query its
/// status before retrying the write.
pub async fn await_confirmation<W: WalletService>(
    wallet: &W,
    handle: &TxHandle,
    timeout: std::time::Duration,
    poll_interval: std::time::Duration,
) -> Result<(), InvoiceError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match wallet.status(handle).await? {
            TxState::Confirmed => {
                tracing::debug!(tx = %handle, "transaction confirmed");
                return Ok(());
            }
            TxState::Failed { reason } => {
                tracing::warn!(tx = %handle, reason = %reason, "transaction failed");
                return Err(InvoiceError::TransactionFailed {
                    handle: handle.id.clone(),
                    reason,
                });
            }
            TxState::Queued | TxState::Sent => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(InvoiceError::ConfirmationTimeout(handle.id.clone()));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Self-custody wallet: signs and broadcasts through an alloy provider
/// carrying a local signer.
pub struct ProviderWallet<P> {
    provider: P,
}

impl<P> ProviderWallet<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P> WalletService for ProviderWallet<P>
where
    P: Provider + Send + Sync,
{
    async fn submit(&self, call: &ContractCall) -> Result<TxHandle, InvoiceError> {
        let tx = TransactionRequest::default()
            .with_to(call.contract)
            .with_input(call.calldata.clone());

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| InvoiceError::ChainError(format!("{} send failed: {e}", call.function)))?;
        let hash = *pending.tx_hash();

        tracing::debug!(
            function = %call.function,
            contract = %call.contract,
            tx = %hash,
            "transaction submitted"
        );
        Ok(TxHandle {
            id: format!("{hash}"),
            tx_hash: Some(hash),
        })
    }

    async fn status(&self, handle: &TxHandle) -> Result<TxState, InvoiceError> {
        let Some(hash) = handle.tx_hash else {
            return Ok(TxState::Queued);
        };
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| InvoiceError::ChainError(format!("receipt lookup failed: {e}")))?;
        match receipt {
            None => Ok(TxState::Sent),
            Some(r) if r.status() => Ok(TxState::Confirmed),
            Some(_) => Ok(TxState::Failed {
                reason: "transaction reverted".to_string(),
            }),
        }
    }
}
