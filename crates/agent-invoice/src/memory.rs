//! In-memory ledger with full settlement semantics.
//!
//! Substitutes for the deployed contracts in tests and local development.
//! Each operation runs under one lock, mirroring the ledger's transaction
//! serialization: an `execute_auto_payment` call observes and mutates
//! balance, spend, and invoice state as a single indivisible unit, and a
//! racing second call observes the post-effect values.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use dashmap::DashMap;

use crate::eip712;
use crate::error::InvoiceError;
use crate::gateway::BurnIntentWire;
use crate::invoice::{Invoice, InvoiceStatus, NewInvoice};
use crate::ledger::{
    AutoPayReceipt, EscrowInfo, GatewayAttestation, InvoiceEvent, Ledger, Settlement, SpendingInfo,
    Spender,
};

#[derive(Default)]
struct EscrowAccount {
    balance: U256,
    deposit_count: u64,
    withdraw_count: u64,
}

#[derive(Default, Clone, Copy)]
struct SpendRecord {
    limit: U256,
    spent: U256,
}

struct State {
    caller: Address,
    attester: Address,
    clock: u64,
    block: u64,
    seq: u64,
    invoices: HashMap<B256, Invoice>,
    by_payer: HashMap<Address, Vec<B256>>,
    by_payee: HashMap<Address, Vec<B256>>,
    /// Settlement-asset balances.
    token: HashMap<Address, U256>,
    /// (owner, spender) allowances of the settlement asset.
    allowances: HashMap<(Address, Spender), U256>,
    escrow: HashMap<Address, EscrowAccount>,
    spending: HashMap<(Address, Address), SpendRecord>,
    /// Authorized auto-pay spender per payer account.
    operators: HashMap<Address, Address>,
    events: Vec<(u64, InvoiceEvent)>,
}

impl State {
    fn tick(&mut self) {
        self.block += 1;
        self.clock += 1;
    }

    fn emit(&mut self, event: InvoiceEvent) {
        self.events.push((self.block, event));
    }

    fn invoice_mut(&mut self, id: B256) -> Result<&mut Invoice, InvoiceError> {
        self.invoices.get_mut(&id).ok_or(InvoiceError::NotFound(id))
    }

    /// Shared settlement guard: the invoice must exist, be internally
    /// consistent, and be in `PENDING`.
    fn payable(&mut self, id: B256) -> Result<&mut Invoice, InvoiceError> {
        let invoice = self.invoice_mut(id)?;
        invoice.check_consistency()?;
        match invoice.status {
            InvoiceStatus::Pending => Ok(invoice),
            InvoiceStatus::Paid => Err(InvoiceError::AlreadyPaid(id)),
            status => Err(InvoiceError::InvoiceNotPending {
                id,
                status: status.as_str(),
            }),
        }
    }

    fn record_invoice(&mut self, params: &NewInvoice) -> Result<B256, InvoiceError> {
        params.validate()?;
        self.tick();
        self.seq += 1;

        let mut preimage = Vec::with_capacity(20 + 20 + 32 + params.description.len() + 8);
        preimage.extend_from_slice(params.payer.as_slice());
        preimage.extend_from_slice(params.payee.as_slice());
        preimage.extend_from_slice(&params.amount.to_be_bytes::<32>());
        preimage.extend_from_slice(params.description.as_bytes());
        preimage.extend_from_slice(&self.seq.to_be_bytes());
        let id = keccak256(&preimage);

        let invoice = Invoice {
            id,
            payer: params.payer,
            payee: params.payee,
            amount: params.amount,
            status: InvoiceStatus::Pending,
            description: params.description.clone(),
            usage_hash: params.usage_hash,
            usage_signature: params.usage_signature.clone(),
            created_at: self.clock,
            paid_at: 0,
            hold_reason: String::new(),
        };

        self.invoices.insert(id, invoice);
        self.by_payer.entry(params.payer).or_default().push(id);
        self.by_payee.entry(params.payee).or_default().push(id);
        self.emit(InvoiceEvent::Created {
            id,
            payer: params.payer,
            payee: params.payee,
            amount: params.amount,
            description: params.description.clone(),
        });
        Ok(id)
    }

    fn mark_paid(&mut self, id: B256) -> Result<Settlement, InvoiceError> {
        let paid_at = self.clock;
        let block = self.block;
        let invoice = self.invoice_mut(id)?;
        invoice.status = InvoiceStatus::Paid;
        invoice.paid_at = paid_at;
        let amount = invoice.amount;
        self.emit(InvoiceEvent::Paid {
            id,
            amount,
            timestamp: paid_at,
        });
        Ok(Settlement {
            transaction: format!("mem-{block}"),
            paid_at,
        })
    }

    fn debit_token(&mut self, owner: Address, amount: U256) -> Result<(), InvoiceError> {
        let balance = self.token.entry(owner).or_default();
        if *balance < amount {
            return Err(InvoiceError::InsufficientBalance {
                available: *balance,
                required: amount,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn credit_token(&mut self, owner: Address, amount: U256) {
        *self.token.entry(owner).or_default() += amount;
    }
}

/// In-memory stand-in for the registry, processor, and escrow contracts.
pub struct InMemoryLedger {
    state: Mutex<State>,
    /// Consumed burn-intent nonces — the destination chain's replay guard.
    /// A claimed nonce is never released.
    consumed_nonces: DashMap<B256, ()>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                caller: Address::ZERO,
                attester: Address::ZERO,
                clock: 1_700_000_000,
                block: 1_000,
                seq: 0,
                invoices: HashMap::new(),
                by_payer: HashMap::new(),
                by_payee: HashMap::new(),
                token: HashMap::new(),
                allowances: HashMap::new(),
                escrow: HashMap::new(),
                spending: HashMap::new(),
                operators: HashMap::new(),
                events: Vec::new(),
            }),
            consumed_nonces: DashMap::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means a panic mid-transaction; recover the guard,
        // the state itself is only mutated after all checks pass.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Impersonate `caller` for subsequent writes (the identity the wallet
    /// signer would supply on a real chain).
    pub fn set_caller(&self, caller: Address) {
        self.lock().caller = caller;
    }

    /// Configure the gateway attester address the processor trusts.
    pub fn set_attester(&self, attester: Address) {
        self.lock().attester = attester;
    }

    /// Authorize `operator` to auto-pay from `payer`'s escrow account.
    pub fn set_operator(&self, payer: Address, operator: Address) {
        self.lock().operators.insert(payer, operator);
    }

    /// Credit settlement-asset balance out of thin air.
    pub fn mint(&self, owner: Address, amount: U256) {
        self.lock().credit_token(owner, amount);
    }

    pub fn token_balance(&self, owner: Address) -> U256 {
        self.lock().token.get(&owner).copied().unwrap_or_default()
    }

    pub fn block_height(&self) -> u64 {
        self.lock().block
    }

    pub fn advance_blocks(&self, n: u64) {
        self.lock().block += n;
    }

    // --- policy collaborator surface (not part of the narrow Ledger seam) ---

    /// Pause a pending invoice pending review.
    pub fn hold_invoice(&self, id: B256, reason: &str) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let invoice = state.payable(id)?;
        invoice.status = InvoiceStatus::Held;
        invoice.hold_reason = reason.to_string();
        state.emit(InvoiceEvent::Held {
            id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Clear a hold, returning the invoice to `PENDING`.
    pub fn release_hold(&self, id: B256) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let invoice = state.invoice_mut(id)?;
        if invoice.status != InvoiceStatus::Held {
            return Err(InvoiceError::InvoiceNotPending {
                id,
                status: invoice.status.as_str(),
            });
        }
        invoice.status = InvoiceStatus::Pending;
        invoice.hold_reason.clear();
        Ok(())
    }

    /// Cancel a pending or held invoice. Terminal.
    pub fn cancel_invoice(&self, id: B256) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let invoice = state.invoice_mut(id)?;
        match invoice.status {
            InvoiceStatus::Pending | InvoiceStatus::Held => {
                invoice.status = InvoiceStatus::Cancelled;
                invoice.hold_reason.clear();
                Ok(())
            }
            InvoiceStatus::Paid => Err(InvoiceError::AlreadyPaid(id)),
            InvoiceStatus::Cancelled => Err(InvoiceError::InvoiceNotPending {
                id,
                status: "CANCELLED",
            }),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    async fn create_invoice(&self, params: &NewInvoice) -> Result<B256, InvoiceError> {
        self.lock().record_invoice(params)
    }

    async fn invoice(&self, id: B256) -> Result<Invoice, InvoiceError> {
        let state = self.lock();
        let invoice = state.invoices.get(&id).ok_or(InvoiceError::NotFound(id))?;
        invoice.check_consistency()?;
        Ok(invoice.clone())
    }

    async fn invoices_by_payer(&self, payer: Address) -> Result<Vec<B256>, InvoiceError> {
        Ok(self.lock().by_payer.get(&payer).cloned().unwrap_or_default())
    }

    async fn invoices_by_payee(&self, payee: Address) -> Result<Vec<B256>, InvoiceError> {
        Ok(self.lock().by_payee.get(&payee).cloned().unwrap_or_default())
    }

    async fn approve(&self, spender: Spender, amount: U256) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let owner = state.caller;
        state.allowances.insert((owner, spender), amount);
        Ok(())
    }

    async fn allowance(&self, owner: Address, spender: Spender) -> Result<U256, InvoiceError> {
        Ok(self
            .lock()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn pay_invoice_direct(&self, id: B256) -> Result<Settlement, InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let invoice = state.payable(id)?;
        let (payer, payee, amount) = (invoice.payer, invoice.payee, invoice.amount);

        let allowance = state
            .allowances
            .get(&(payer, Spender::Processor))
            .copied()
            .unwrap_or_default();
        if allowance < amount {
            return Err(InvoiceError::InsufficientBalance {
                available: allowance,
                required: amount,
            });
        }

        state.debit_token(payer, amount)?;
        state.credit_token(payee, amount);
        if let Some(a) = state.allowances.get_mut(&(payer, Spender::Processor)) {
            *a -= amount;
        }
        state.mark_paid(id)
    }

    async fn pay_invoice_via_gateway(
        &self,
        id: B256,
        attestation: &GatewayAttestation,
    ) -> Result<Settlement, InvoiceError> {
        let mut state = self.lock();
        state.tick();

        let invoice = state.payable(id)?;
        let (payee, amount) = (invoice.payee, invoice.amount);

        // 1. Attester signature over the raw attestation bytes.
        eip712::verify_attester_signature(
            &attestation.attestation,
            &attestation.attestation_signature,
            state.attester,
        )?;

        // 2. Decode and cross-check the attested transfer.
        let wire: BurnIntentWire = serde_json::from_slice(&attestation.attestation)
            .map_err(|e| InvoiceError::BadAttestation(format!("undecodable attestation: {e}")))?;
        let intent = wire.to_intent()?;
        if intent.destinationRecipient != payee {
            return Err(InvoiceError::BadAttestation(format!(
                "attested recipient {} does not match payee {payee}",
                intent.destinationRecipient
            )));
        }
        if intent.amount < amount {
            return Err(InvoiceError::BadAttestation(format!(
                "attested amount {} below invoice amount {amount}",
                intent.amount
            )));
        }

        // 3. Hard expiry.
        let max_block_height: u64 = intent.maxBlockHeight.saturating_to();
        if max_block_height < state.block {
            return Err(InvoiceError::Expired {
                max_block_height,
                current: state.block,
            });
        }

        // 4. Replay guard: claim the nonce, never release it.
        use dashmap::mapref::entry::Entry;
        match self.consumed_nonces.entry(intent.nonce) {
            Entry::Occupied(_) => return Err(InvoiceError::AlreadyConsumed),
            Entry::Vacant(v) => {
                v.insert(());
            }
        }

        // All checks passed; apply effects as one unit.
        state.credit_token(payee, amount);
        state.mark_paid(id)
    }

    async fn deposit(&self, payer_tag: &str, amount: U256) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let payer = state.caller;

        let allowance = state
            .allowances
            .get(&(payer, Spender::Escrow))
            .copied()
            .unwrap_or_default();
        if allowance < amount {
            return Err(InvoiceError::InsufficientBalance {
                available: allowance,
                required: amount,
            });
        }

        state.debit_token(payer, amount)?;
        if let Some(a) = state.allowances.get_mut(&(payer, Spender::Escrow)) {
            *a -= amount;
        }
        let account = state.escrow.entry(payer).or_default();
        account.balance += amount;
        account.deposit_count += 1;

        tracing::info!(payer = %payer, tag = %payer_tag, amount = %amount, "escrow deposit");
        Ok(())
    }

    async fn withdraw(&self, payer_tag: &str, amount: U256) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let payer = state.caller;

        let account = state.escrow.entry(payer).or_default();
        if account.balance < amount {
            return Err(InvoiceError::InsufficientBalance {
                available: account.balance,
                required: amount,
            });
        }
        account.balance -= amount;
        account.withdraw_count += 1;
        state.credit_token(payer, amount);

        tracing::info!(payer = %payer, tag = %payer_tag, amount = %amount, "escrow withdrawal");
        Ok(())
    }

    async fn set_spending_limit(&self, provider: Address, limit: U256) -> Result<(), InvoiceError> {
        let mut state = self.lock();
        state.tick();
        let payer = state.caller;
        state.spending.entry((payer, provider)).or_default().limit = limit;
        Ok(())
    }

    async fn execute_auto_payment(
        &self,
        payer: Address,
        provider: Address,
        amount: U256,
        description: &str,
        usage_hash: B256,
        usage_signature: &Bytes,
    ) -> Result<AutoPayReceipt, InvoiceError> {
        let mut state = self.lock();

        // Caller must be the account's authorized spender (or the payer).
        let caller = state.caller;
        let authorized = caller == payer || state.operators.get(&payer) == Some(&caller);
        if !authorized {
            return Err(InvoiceError::Unauthorized(format!(
                "{caller} is not an authorized spender for {payer}"
            )));
        }

        // (a) Create the invoice in PENDING. A later precondition failure
        // leaves it visible and unpaid, never partially paid.
        let invoice_id = state.record_invoice(&NewInvoice {
            payer,
            payee: provider,
            amount,
            description: description.to_string(),
            usage_hash,
            usage_signature: usage_signature.clone(),
        })?;

        // (b) Escrow balance.
        let balance = state
            .escrow
            .get(&payer)
            .map(|a| a.balance)
            .unwrap_or_default();
        if balance < amount {
            return Err(InvoiceError::InsufficientBalance {
                available: balance,
                required: amount,
            });
        }

        // (c) Cumulative spending limit.
        let record = state
            .spending
            .get(&(payer, provider))
            .copied()
            .unwrap_or_default();
        if record.spent + amount > record.limit {
            return Err(InvoiceError::SpendingLimitExceeded {
                limit: record.limit,
                spent: record.spent,
                requested: amount,
            });
        }

        // All preconditions hold; the three effects are one unit.
        state.escrow.entry(payer).or_default().balance -= amount;
        state.spending.entry((payer, provider)).or_default().spent += amount;
        state.credit_token(provider, amount);
        let settlement = state.mark_paid(invoice_id)?;

        tracing::info!(
            payer = %payer,
            provider = %provider,
            amount = %amount,
            invoice = %invoice_id,
            "autonomous payment settled"
        );
        Ok(AutoPayReceipt {
            invoice_id,
            transaction: settlement.transaction,
            paid_at: settlement.paid_at,
        })
    }

    async fn escrow_info(&self, payer: Address) -> Result<EscrowInfo, InvoiceError> {
        let state = self.lock();
        let account = state.escrow.get(&payer);
        Ok(EscrowInfo {
            balance: account.map(|a| a.balance).unwrap_or_default(),
            deposit_count: account.map(|a| a.deposit_count).unwrap_or_default(),
            withdraw_count: account.map(|a| a.withdraw_count).unwrap_or_default(),
        })
    }

    async fn spending_info(
        &self,
        payer: Address,
        provider: Address,
    ) -> Result<SpendingInfo, InvoiceError> {
        let record = self
            .lock()
            .spending
            .get(&(payer, provider))
            .copied()
            .unwrap_or_default();
        Ok(SpendingInfo {
            limit: record.limit,
            spent: record.spent,
        })
    }

    async fn events(&self, from_block: u64) -> Result<Vec<InvoiceEvent>, InvoiceError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|(block, _)| *block >= from_block)
            .map(|(_, event)| event.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(payer: Address, payee: Address, amount: u64) -> NewInvoice {
        NewInvoice {
            payer,
            payee,
            amount: U256::from(amount),
            description: "test".to_string(),
            usage_hash: B256::ZERO,
            usage_signature: Bytes::new(),
        }
    }

    const PAYER: Address = Address::repeat_byte(0xaa);
    const PAYEE: Address = Address::repeat_byte(0xbb);

    #[tokio::test]
    async fn test_create_and_read() {
        let ledger = InMemoryLedger::new();
        let id = ledger
            .create_invoice(&params(PAYER, PAYEE, 500_000))
            .await
            .unwrap();

        let invoice = ledger.invoice(id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.amount, U256::from(500_000u64));
        assert_eq!(invoice.paid_at, 0);
        assert!(invoice.created_at > 0);

        assert_eq!(ledger.invoices_by_payer(PAYER).await.unwrap(), vec![id]);
        assert_eq!(ledger.invoices_by_payee(PAYEE).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_insertion_order_listing() {
        let ledger = InMemoryLedger::new();
        let a = ledger
            .create_invoice(&params(PAYER, PAYEE, 1))
            .await
            .unwrap();
        let b = ledger
            .create_invoice(&params(PAYER, PAYEE, 2))
            .await
            .unwrap();
        assert_eq!(ledger.invoices_by_payer(PAYER).await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_unknown_invoice_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger.invoice(B256::repeat_byte(0x01)).await.unwrap_err();
        assert!(matches!(err, InvoiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_direct_pay_requires_allowance() {
        let ledger = InMemoryLedger::new();
        ledger.mint(PAYER, U256::from(1_000_000u64));
        let id = ledger
            .create_invoice(&params(PAYER, PAYEE, 500_000))
            .await
            .unwrap();

        // No allowance yet: rejected, invoice stays PENDING.
        let err = ledger.pay_invoice_direct(id).await.unwrap_err();
        assert!(matches!(err, InvoiceError::InsufficientBalance { .. }));
        assert_eq!(
            ledger.invoice(id).await.unwrap().status,
            InvoiceStatus::Pending
        );

        ledger.set_caller(PAYER);
        ledger
            .approve(Spender::Processor, U256::from(500_000u64))
            .await
            .unwrap();
        let settlement = ledger.pay_invoice_direct(id).await.unwrap();
        assert!(settlement.paid_at > 0);
        assert_eq!(ledger.token_balance(PAYEE), U256::from(500_000u64));
    }

    #[tokio::test]
    async fn test_hold_then_cancel() {
        let ledger = InMemoryLedger::new();
        let id = ledger
            .create_invoice(&params(PAYER, PAYEE, 100))
            .await
            .unwrap();

        ledger.hold_invoice(id, "usage dispute").unwrap();
        let held = ledger.invoice(id).await.unwrap();
        assert_eq!(held.status, InvoiceStatus::Held);
        assert_eq!(held.hold_reason, "usage dispute");

        // Cannot pay from HELD.
        ledger.set_caller(PAYER);
        ledger.mint(PAYER, U256::from(100u64));
        ledger.approve(Spender::Processor, U256::from(100u64)).await.unwrap();
        let err = ledger.pay_invoice_direct(id).await.unwrap_err();
        assert!(matches!(err, InvoiceError::InvoiceNotPending { .. }));

        ledger.cancel_invoice(id).unwrap();
        assert_eq!(
            ledger.invoice(id).await.unwrap().status,
            InvoiceStatus::Cancelled
        );

        // Terminal: no further transitions.
        assert!(ledger.hold_invoice(id, "again").is_err());
        assert!(ledger.cancel_invoice(id).is_err());
    }

    #[tokio::test]
    async fn test_hold_release_returns_to_pending() {
        let ledger = InMemoryLedger::new();
        let id = ledger
            .create_invoice(&params(PAYER, PAYEE, 100))
            .await
            .unwrap();
        ledger.hold_invoice(id, "review").unwrap();
        ledger.release_hold(id).unwrap();
        let invoice = ledger.invoice(id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert!(invoice.hold_reason.is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_respects_balance() {
        let ledger = InMemoryLedger::new();
        ledger.set_caller(PAYER);
        ledger.mint(PAYER, U256::from(1_000_000u64));
        ledger
            .approve(Spender::Escrow, U256::from(400_000u64))
            .await
            .unwrap();
        ledger.deposit("agent-1", U256::from(400_000u64)).await.unwrap();

        let err = ledger
            .withdraw("agent-1", U256::from(500_000u64))
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::InsufficientBalance { .. }));

        ledger.withdraw("agent-1", U256::from(150_000u64)).await.unwrap();
        let info = ledger.escrow_info(PAYER).await.unwrap();
        assert_eq!(info.balance, U256::from(250_000u64));
        assert_eq!(info.deposit_count, 1);
        assert_eq!(info.withdraw_count, 1);
    }

    #[tokio::test]
    async fn test_events_are_ordered_and_bounded() {
        let ledger = InMemoryLedger::new();
        let start = ledger.block_height();
        let id = ledger
            .create_invoice(&params(PAYER, PAYEE, 100))
            .await
            .unwrap();
        ledger.hold_invoice(id, "check").unwrap();

        let all = ledger.events(start).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(matches!(all[0], InvoiceEvent::Created { .. }));
        assert!(matches!(all[1], InvoiceEvent::Held { .. }));

        // Restartable from a later block.
        let later = ledger.events(ledger.block_height()).await.unwrap();
        assert_eq!(later.len(), 1);
    }
}
