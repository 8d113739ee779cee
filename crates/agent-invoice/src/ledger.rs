//! The ledger seam: a narrow, injected read/write façade over the invoice
//! registry, payment processor, and escrow contracts.
//!
//! The distributed ledger is the single source of truth for invoice and
//! escrow state. This crate never holds a process-wide handle to it — every
//! component takes a [`Ledger`] by constructor injection, so tests can
//! substitute [`crate::InMemoryLedger`] for the contract-backed
//! [`crate::ContractLedger`].
//!
//! Per-call atomicity comes from the ledger's transaction serialization:
//! one `execute_auto_payment` call is atomic end-to-end as the ledger sees
//! it, and two racing calls are ordered by the ledger with the second
//! legitimately rejected by the preconditions it then observes.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::InvoiceError;
use crate::invoice::{Invoice, NewInvoice};

/// Which contract an allowance is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Spender {
    /// Payment processor — direct settlement pulls funds through it.
    Processor,
    /// Escrow contract — deposits pull funds through it.
    Escrow,
}

/// Outcome of a successful settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Opaque transaction reference on the ledger.
    pub transaction: String,
    /// Unix seconds recorded as the invoice's `paid_at`.
    pub paid_at: u64,
}

/// Outcome of a successful autonomous payment: the invoice it created and
/// settled in one indivisible unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoPayReceipt {
    pub invoice_id: B256,
    pub transaction: String,
    pub paid_at: u64,
}

/// Attestation pair returned by the gateway, consumed exactly once by the
/// destination-chain settlement call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAttestation {
    pub attestation: Bytes,
    pub attestation_signature: Bytes,
}

/// Escrow account snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowInfo {
    pub balance: U256,
    pub deposit_count: u64,
    pub withdraw_count: u64,
}

/// Per-(payer, provider) spending snapshot. `spent` is cumulative for the
/// account's lifetime — there is no reset mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendingInfo {
    pub limit: U256,
    pub spent: U256,
}

/// Registry events decoded for downstream indexers and audits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceEvent {
    Created {
        id: B256,
        payer: Address,
        payee: Address,
        amount: U256,
        description: String,
    },
    Paid {
        id: B256,
        amount: U256,
        timestamp: u64,
    },
    Held {
        id: B256,
        reason: String,
    },
}

/// Typed read/write surface over the invoice registry, payment processor,
/// and escrow contracts.
///
/// Writes are submitted as ledger transactions by the caller's identity
/// (the wallet signer for the contract implementation); reads reflect
/// confirmed ledger state only.
pub trait Ledger: Send + Sync {
    /// Record a new invoice in `PENDING`. Emits `InvoiceCreated`.
    fn create_invoice(
        &self,
        params: &NewInvoice,
    ) -> impl std::future::Future<Output = Result<B256, InvoiceError>> + Send;

    /// Read a full invoice record, or `NotFound`.
    fn invoice(
        &self,
        id: B256,
    ) -> impl std::future::Future<Output = Result<Invoice, InvoiceError>> + Send;

    /// Invoice ids for a payer, in insertion order. The sequence can grow
    /// between calls; callers must treat it as a restartable enumeration.
    fn invoices_by_payer(
        &self,
        payer: Address,
    ) -> impl std::future::Future<Output = Result<Vec<B256>, InvoiceError>> + Send;

    /// Invoice ids for a payee, in insertion order.
    fn invoices_by_payee(
        &self,
        payee: Address,
    ) -> impl std::future::Future<Output = Result<Vec<B256>, InvoiceError>> + Send;

    /// Authorize `spender` to pull `amount` of the settlement asset from the
    /// caller. Phase 1 of direct pay and escrow deposits; the returned
    /// future resolves only once the approval is *confirmed*.
    fn approve(
        &self,
        spender: Spender,
        amount: U256,
    ) -> impl std::future::Future<Output = Result<(), InvoiceError>> + Send;

    /// Current settlement-asset allowance from `owner` to `spender`.
    fn allowance(
        &self,
        owner: Address,
        spender: Spender,
    ) -> impl std::future::Future<Output = Result<U256, InvoiceError>> + Send;

    /// Direct settlement: pull authorized funds, mark the invoice `PAID`.
    fn pay_invoice_direct(
        &self,
        id: B256,
    ) -> impl std::future::Future<Output = Result<Settlement, InvoiceError>> + Send;

    /// Cross-chain settlement: verify the attestation pair (attester
    /// signature, expiry, nonce single-use), then mark the invoice `PAID`.
    fn pay_invoice_via_gateway(
        &self,
        id: B256,
        attestation: &GatewayAttestation,
    ) -> impl std::future::Future<Output = Result<Settlement, InvoiceError>> + Send;

    /// Move settlement-asset funds from the caller into their escrow
    /// balance. Requires a prior confirmed [`Ledger::approve`] for
    /// [`Spender::Escrow`].
    fn deposit(
        &self,
        payer_tag: &str,
        amount: U256,
    ) -> impl std::future::Future<Output = Result<(), InvoiceError>> + Send;

    /// Withdraw unspent escrow balance back to the caller.
    fn withdraw(
        &self,
        payer_tag: &str,
        amount: U256,
    ) -> impl std::future::Future<Output = Result<(), InvoiceError>> + Send;

    /// Overwrite the caller's cumulative auto-pay limit for `provider`.
    /// Lowering the limit below what is already spent is permitted and
    /// blocks further auto-pay to that provider.
    fn set_spending_limit(
        &self,
        provider: Address,
        limit: U256,
    ) -> impl std::future::Future<Output = Result<(), InvoiceError>> + Send;

    /// Autonomous payment: create the invoice in `PENDING`, check balance
    /// then spending limit, and apply all three effects (balance down,
    /// spent up, invoice `PAID`) as one indivisible ledger transaction.
    /// On any precondition failure the invoice is left `PENDING`.
    fn execute_auto_payment(
        &self,
        payer: Address,
        provider: Address,
        amount: U256,
        description: &str,
        usage_hash: B256,
        usage_signature: &Bytes,
    ) -> impl std::future::Future<Output = Result<AutoPayReceipt, InvoiceError>> + Send;

    /// Escrow account snapshot for a payer.
    fn escrow_info(
        &self,
        payer: Address,
    ) -> impl std::future::Future<Output = Result<EscrowInfo, InvoiceError>> + Send;

    /// Spending limit and cumulative spend for a (payer, provider) pair.
    fn spending_info(
        &self,
        payer: Address,
        provider: Address,
    ) -> impl std::future::Future<Output = Result<SpendingInfo, InvoiceError>> + Send;

    /// Registry events from `from_block` onward, in emission order.
    /// Poll-based and restartable; callers bound their own polling.
    fn events(
        &self,
        from_block: u64,
    ) -> impl std::future::Future<Output = Result<Vec<InvoiceEvent>, InvoiceError>> + Send;
}
