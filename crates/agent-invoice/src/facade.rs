//! High-level client tying the ledger, the attestation gateway, and the
//! chain configuration into the three settlement flows.
//!
//! Every flow is sequential: the allowance phase resolves on confirmation
//! before the settlement call is submitted, and the cross-chain path signs
//! the burn intent only after the gateway accepted the source chain.

use alloy::primitives::{utils::eip191_hash_message, Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use crate::constants::ChainConfig;
use crate::eip712;
use crate::error::InvoiceError;
use crate::gateway::{estimate_transfer_secs, GatewayClient};
use crate::invoice::{usage_attestation, Invoice, InvoiceStatus, NewInvoice, UsagePolicy};
use crate::ledger::{
    AutoPayReceipt, EscrowInfo, InvoiceEvent, Ledger, Settlement, SpendingInfo, Spender,
};

/// Invoice client over an injected [`Ledger`].
///
/// Generic over the ledger so the same flows run against the deployed
/// contracts and against [`crate::InMemoryLedger`] in tests.
pub struct AgentInvoice<L> {
    ledger: L,
    gateway: GatewayClient,
    config: ChainConfig,
    usage_policy: UsagePolicy,
}

impl<L> AgentInvoice<L> {
    pub fn new(ledger: L, gateway: GatewayClient, config: ChainConfig) -> Self {
        Self {
            ledger,
            gateway,
            config,
            usage_policy: UsagePolicy::default(),
        }
    }

    /// Require a valid payee signature over the usage hash before paying.
    pub fn with_usage_policy(mut self, policy: UsagePolicy) -> Self {
        self.usage_policy = policy;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Rough wall-clock estimate for a cross-chain settlement from
    /// `source_chain`, in seconds.
    pub fn transfer_estimate_secs(&self, source_chain: u64) -> u64 {
        estimate_transfer_secs(source_chain)
    }
}

fn ensure_pending(invoice: &Invoice) -> Result<(), InvoiceError> {
    match invoice.status {
        InvoiceStatus::Pending => Ok(()),
        InvoiceStatus::Paid => Err(InvoiceError::AlreadyPaid(invoice.id)),
        status => Err(InvoiceError::InvoiceNotPending {
            id: invoice.id,
            status: status.as_str(),
        }),
    }
}

/// Sign the usage hash as an EIP-191 personal message.
pub fn sign_usage_hash(
    usage_hash: B256,
    signer: &PrivateKeySigner,
) -> Result<Bytes, InvoiceError> {
    let signature = signer
        .sign_hash_sync(&eip191_hash_message(usage_hash))
        .map_err(|e| InvoiceError::SignatureError(format!("usage signing failed: {e}")))?;
    Ok(Bytes::from(signature.as_bytes().to_vec()))
}

impl<L: Ledger> AgentInvoice<L> {
    /// Create an invoice carrying a hash of the usage data.
    ///
    /// The usage JSON is canonicalized and hashed; the record stores the
    /// hash only, with no signature over it.
    pub async fn create_invoice(
        &self,
        payer: Address,
        payee: Address,
        amount: U256,
        description: &str,
        usage: &serde_json::Value,
    ) -> Result<B256, InvoiceError> {
        let (usage_hash, _) = usage_attestation(usage)?;
        self.ledger
            .create_invoice(&NewInvoice {
                payer,
                payee,
                amount,
                description: description.to_string(),
                usage_hash,
                usage_signature: Bytes::new(),
            })
            .await
    }

    /// Create an invoice and sign the usage hash with the payee's key, so a
    /// client running [`UsagePolicy::Enforce`] can verify what it is paying
    /// for.
    pub async fn create_signed_invoice(
        &self,
        payer: Address,
        payee_signer: &PrivateKeySigner,
        amount: U256,
        description: &str,
        usage: &serde_json::Value,
    ) -> Result<B256, InvoiceError> {
        let (usage_hash, _) = usage_attestation(usage)?;
        let usage_signature = sign_usage_hash(usage_hash, payee_signer)?;
        self.ledger
            .create_invoice(&NewInvoice {
                payer,
                payee: payee_signer.address(),
                amount,
                description: description.to_string(),
                usage_hash,
                usage_signature,
            })
            .await
    }

    pub async fn invoice(&self, id: B256) -> Result<Invoice, InvoiceError> {
        self.ledger.invoice(id).await
    }

    pub async fn invoices_by_payer(&self, payer: Address) -> Result<Vec<B256>, InvoiceError> {
        self.ledger.invoices_by_payer(payer).await
    }

    pub async fn invoices_by_payee(&self, payee: Address) -> Result<Vec<B256>, InvoiceError> {
        self.ledger.invoices_by_payee(payee).await
    }

    /// Direct settlement on the invoice's home chain.
    ///
    /// Two-phase: a confirmed approval of the payment processor for exactly
    /// the invoice amount, then the processor call. `payer` must match the
    /// invoice record and the caller's ledger identity.
    pub async fn pay_invoice_direct(
        &self,
        payer: Address,
        id: B256,
    ) -> Result<Settlement, InvoiceError> {
        let invoice = self.ledger.invoice(id).await?;
        ensure_pending(&invoice)?;
        if invoice.payer != payer {
            return Err(InvoiceError::Unauthorized(format!(
                "invoice {id} names payer {}, not {payer}",
                invoice.payer
            )));
        }
        self.usage_policy
            .verify(invoice.usage_hash, &invoice.usage_signature, invoice.payee)?;

        self.ledger
            .approve(Spender::Processor, invoice.amount)
            .await?;
        let settlement = self.ledger.pay_invoice_direct(id).await?;
        tracing::info!(
            invoice = %id,
            amount = %invoice.amount,
            transaction = %settlement.transaction,
            "invoice settled directly"
        );
        Ok(settlement)
    }

    /// Cross-chain settlement: sign a burn intent on `source_chain`, trade
    /// it for a gateway attestation, and present the attestation to the
    /// processor on the invoice's home chain.
    pub async fn pay_invoice_via_gateway(
        &self,
        id: B256,
        source_signer: &PrivateKeySigner,
        source_chain: u64,
    ) -> Result<Settlement, InvoiceError> {
        let invoice = self.ledger.invoice(id).await?;
        ensure_pending(&invoice)?;
        self.usage_policy
            .verify(invoice.usage_hash, &invoice.usage_signature, invoice.payee)?;

        let intent = self
            .gateway
            .create_burn_intent(
                source_signer.address(),
                source_chain,
                self.config.chain_id,
                invoice.payee,
                invoice.amount,
            )
            .await?;
        let signature = eip712::sign_burn_intent(&intent, source_signer)?;
        let attestation = self.gateway.request_attestation(&intent, &signature).await?;

        tracing::info!(
            invoice = %id,
            source_chain,
            estimate_secs = estimate_transfer_secs(source_chain),
            "attestation obtained, settling on destination"
        );
        self.ledger.pay_invoice_via_gateway(id, &attestation).await
    }

    /// Approve the escrow contract and move funds into the caller's escrow
    /// balance.
    pub async fn fund_escrow(&self, payer_tag: &str, amount: U256) -> Result<(), InvoiceError> {
        self.ledger.approve(Spender::Escrow, amount).await?;
        self.ledger.deposit(payer_tag, amount).await
    }

    pub async fn withdraw(&self, payer_tag: &str, amount: U256) -> Result<(), InvoiceError> {
        self.ledger.withdraw(payer_tag, amount).await
    }

    /// Overwrite the caller's cumulative auto-pay limit for `provider`.
    pub async fn set_spending_limit(
        &self,
        provider: Address,
        limit: U256,
    ) -> Result<(), InvoiceError> {
        self.ledger.set_spending_limit(provider, limit).await
    }

    /// Autonomous settlement out of escrow. Creates and pays the invoice in
    /// one ledger transaction; on a failed precondition the invoice stays
    /// `PENDING` and no balances move.
    pub async fn auto_pay(
        &self,
        payer: Address,
        provider: Address,
        amount: U256,
        description: &str,
        usage: &serde_json::Value,
    ) -> Result<AutoPayReceipt, InvoiceError> {
        let (usage_hash, _) = usage_attestation(usage)?;
        let receipt = self
            .ledger
            .execute_auto_payment(payer, provider, amount, description, usage_hash, &Bytes::new())
            .await?;
        tracing::info!(
            invoice = %receipt.invoice_id,
            payer = %payer,
            provider = %provider,
            amount = %amount,
            "auto payment executed"
        );
        Ok(receipt)
    }

    pub async fn escrow_info(&self, payer: Address) -> Result<EscrowInfo, InvoiceError> {
        self.ledger.escrow_info(payer).await
    }

    pub async fn spending_info(
        &self,
        payer: Address,
        provider: Address,
    ) -> Result<SpendingInfo, InvoiceError> {
        self.ledger.spending_info(payer, provider).await
    }

    pub async fn events(&self, from_block: u64) -> Result<Vec<InvoiceEvent>, InvoiceError> {
        self.ledger.events(from_block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;

    fn client() -> AgentInvoice<InMemoryLedger> {
        AgentInvoice::new(
            InMemoryLedger::new(),
            GatewayClient::testnet(),
            ChainConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_direct_flow_through_client() {
        let client = client();
        let payer = Address::repeat_byte(0xaa);
        let payee = Address::repeat_byte(0xbb);
        client.ledger().set_caller(payer);
        client.ledger().mint(payer, U256::from(1_000_000u64));

        let id = client
            .create_invoice(
                payer,
                payee,
                U256::from(500_000u64),
                "api usage",
                &serde_json::json!({"calls": 42}),
            )
            .await
            .unwrap();

        let settlement = client.pay_invoice_direct(payer, id).await.unwrap();
        assert!(settlement.paid_at > 0);

        let invoice = client.invoice(id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(client.ledger().token_balance(payee), U256::from(500_000u64));
    }

    #[tokio::test]
    async fn test_direct_pay_rejects_wrong_payer() {
        let client = client();
        let payer = Address::repeat_byte(0xaa);
        let id = client
            .create_invoice(
                payer,
                Address::repeat_byte(0xbb),
                U256::from(100u64),
                "api usage",
                &serde_json::json!({}),
            )
            .await
            .unwrap();

        let err = client
            .pay_invoice_direct(Address::repeat_byte(0xcc), id)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_enforced_usage_policy_accepts_signed_invoice() {
        let client = client().with_usage_policy(UsagePolicy::Enforce);
        let payer = Address::repeat_byte(0xaa);
        let payee_signer = PrivateKeySigner::random();
        client.ledger().set_caller(payer);
        client.ledger().mint(payer, U256::from(1_000u64));

        let id = client
            .create_signed_invoice(
                payer,
                &payee_signer,
                U256::from(1_000u64),
                "metered compute",
                &serde_json::json!({"unit": "gpu-second", "quantity": 17}),
            )
            .await
            .unwrap();
        client.pay_invoice_direct(payer, id).await.unwrap();
    }

    #[tokio::test]
    async fn test_enforced_usage_policy_rejects_unsigned_invoice() {
        let client = client().with_usage_policy(UsagePolicy::Enforce);
        let payer = Address::repeat_byte(0xaa);
        let id = client
            .create_invoice(
                payer,
                Address::repeat_byte(0xbb),
                U256::from(1_000u64),
                "metered compute",
                &serde_json::json!({"unit": "gpu-second"}),
            )
            .await
            .unwrap();

        let err = client.pay_invoice_direct(payer, id).await.unwrap_err();
        assert!(matches!(err, InvoiceError::SignatureError(_)));
    }

    #[tokio::test]
    async fn test_auto_pay_through_client() {
        let client = client();
        let payer = Address::repeat_byte(0xaa);
        let provider = Address::repeat_byte(0xbb);
        client.ledger().set_caller(payer);
        client.ledger().mint(payer, U256::from(1_000_000u64));

        client
            .fund_escrow("agent-1", U256::from(200_000u64))
            .await
            .unwrap();
        client
            .set_spending_limit(provider, U256::from(100_000u64))
            .await
            .unwrap();

        let receipt = client
            .auto_pay(
                payer,
                provider,
                U256::from(60_000u64),
                "api usage",
                &serde_json::json!({"calls": 9}),
            )
            .await
            .unwrap();

        let invoice = client.invoice(receipt.invoice_id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        let spending = client.spending_info(payer, provider).await.unwrap();
        assert_eq!(spending.spent, U256::from(60_000u64));
    }
}
