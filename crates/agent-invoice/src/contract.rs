//! Contract-backed ledger gateway.
//!
//! Reads and event decoding go straight through an alloy provider with the
//! `sol!`-typed registry/processor/escrow interfaces. Writes are described
//! as [`ContractCall`]s and routed through the wallet collaborator, then
//! polled to confirmation before the operation resolves — step n+1 of any
//! flow never starts until step n's effects are externally visible.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolCall;

use crate::constants::ChainConfig;
use crate::error::InvoiceError;
use crate::invoice::{Invoice, InvoiceStatus, NewInvoice};
use crate::ledger::{
    AutoPayReceipt, EscrowInfo, GatewayAttestation, InvoiceEvent, Ledger, Settlement, SpendingInfo,
    Spender,
};
use crate::wallet::{await_confirmation, ContractCall, FeeLevel, TxHandle, WalletService};
use crate::{IAgentEscrow, IInvoiceRegistry, IPaymentProcessor, IERC20};

/// Decode an on-ledger record into the client model, enforcing the
/// status/paid_at invariant at the trust boundary.
fn decode_record(record: crate::InvoiceRecord) -> Result<Invoice, InvoiceError> {
    let status = InvoiceStatus::try_from(record.status)?;
    let invoice = Invoice {
        id: record.id,
        payer: record.payer,
        payee: record.payee,
        amount: record.amount,
        status,
        description: record.description,
        usage_hash: record.usageHash,
        usage_signature: record.usageSignature,
        created_at: record.createdAt.saturating_to(),
        paid_at: record.paidAt.saturating_to(),
        hold_reason: record.holdReason,
    };
    invoice.check_consistency()?;
    Ok(invoice)
}

/// Typed façade over the deployed invoice registry, payment processor, and
/// escrow contracts.
pub struct ContractLedger<P, W> {
    provider: P,
    wallet: W,
    config: ChainConfig,
    fee_level: FeeLevel,
    confirm_timeout: std::time::Duration,
    poll_interval: std::time::Duration,
}

impl<P, W> ContractLedger<P, W> {
    pub fn new(provider: P, wallet: W, config: ChainConfig) -> Self {
        Self {
            provider,
            wallet,
            config,
            fee_level: FeeLevel::Medium,
            confirm_timeout: std::time::Duration::from_secs(120),
            poll_interval: std::time::Duration::from_secs(3),
        }
    }

    pub fn with_fee_level(mut self, fee_level: FeeLevel) -> Self {
        self.fee_level = fee_level;
        self
    }

    /// Bound the confirmation polling window for every write.
    pub fn with_confirmation_timeout(
        mut self,
        timeout: std::time::Duration,
        poll_interval: std::time::Duration,
    ) -> Self {
        self.confirm_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn spender_address(&self, spender: Spender) -> Address {
        match spender {
            Spender::Processor => self.config.processor,
            Spender::Escrow => self.config.escrow,
        }
    }
}

impl<P, W> ContractLedger<P, W>
where
    P: Provider + Send + Sync,
    W: WalletService,
{
    /// Submit a described call and wait for it to confirm.
    async fn execute(
        &self,
        contract: Address,
        function: &str,
        parameters: Vec<String>,
        calldata: Vec<u8>,
    ) -> Result<TxHandle, InvoiceError> {
        let call = ContractCall {
            contract,
            function: function.to_string(),
            parameters,
            fee_level: self.fee_level,
            calldata: Bytes::from(calldata),
        };
        let handle = self.wallet.submit(&call).await?;
        tracing::debug!(function = %function, tx = %handle, "awaiting confirmation");
        await_confirmation(&self.wallet, &handle, self.confirm_timeout, self.poll_interval).await?;
        Ok(handle)
    }

    /// Fetch the receipt for a confirmed transaction handle.
    async fn receipt(
        &self,
        handle: &TxHandle,
    ) -> Result<alloy::rpc::types::TransactionReceipt, InvoiceError> {
        let hash = handle.tx_hash.ok_or_else(|| {
            InvoiceError::ChainError(
                "submission service did not expose a transaction hash".to_string(),
            )
        })?;
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| InvoiceError::ChainError(format!("receipt lookup failed: {e}")))?
            .ok_or_else(|| {
                InvoiceError::ChainError(format!("confirmed transaction {hash} has no receipt"))
            })
    }

    /// Read back the invoice after settlement and return the recorded
    /// `paid_at`. Settlement confirmed but unpaid-on-read means the
    /// protocol broke; surface it, never mask it.
    async fn settled(&self, id: B256, handle: &TxHandle) -> Result<Settlement, InvoiceError> {
        let invoice = self.invoice(id).await?;
        if invoice.status != InvoiceStatus::Paid {
            return Err(InvoiceError::InvariantViolation(format!(
                "settlement {handle} confirmed but invoice {id} reads {}",
                invoice.status
            )));
        }
        Ok(Settlement {
            transaction: handle.id.clone(),
            paid_at: invoice.paid_at,
        })
    }
}

impl<P, W> Ledger for ContractLedger<P, W>
where
    P: Provider + Send + Sync,
    W: WalletService,
{
    async fn create_invoice(&self, params: &NewInvoice) -> Result<B256, InvoiceError> {
        params.validate()?;

        let call = IInvoiceRegistry::createInvoiceCall {
            payer: params.payer,
            payee: params.payee,
            amount: params.amount,
            description: params.description.clone(),
            usageHash: params.usage_hash,
            usageSignature: params.usage_signature.clone(),
        };
        let handle = self
            .execute(
                self.config.registry,
                IInvoiceRegistry::createInvoiceCall::SIGNATURE,
                vec![
                    params.payer.to_string(),
                    params.payee.to_string(),
                    params.amount.to_string(),
                    params.description.clone(),
                    params.usage_hash.to_string(),
                    format!("0x{}", alloy::hex::encode(&params.usage_signature)),
                ],
                call.abi_encode(),
            )
            .await?;

        // The registry assigns the id; recover it from the Created event.
        let receipt = self.receipt(&handle).await?;
        let logs = receipt
            .inner
            .as_receipt()
            .map(|r| r.logs.as_slice())
            .unwrap_or_default();
        for log in logs {
            if let Ok(decoded) = log.log_decode::<IInvoiceRegistry::InvoiceCreated>() {
                let id = decoded.inner.data.id;
                tracing::info!(
                    invoice = %id,
                    payer = %params.payer,
                    payee = %params.payee,
                    amount = %params.amount,
                    "invoice created"
                );
                return Ok(id);
            }
        }
        Err(InvoiceError::ChainError(
            "invoice creation confirmed but no InvoiceCreated event emitted".to_string(),
        ))
    }

    async fn invoice(&self, id: B256) -> Result<Invoice, InvoiceError> {
        let registry = IInvoiceRegistry::new(self.config.registry, &self.provider);
        let record = registry
            .getInvoice(id)
            .call()
            .await
            .map_err(|e| InvoiceError::ChainError(format!("getInvoice failed: {e}")))?;
        if record.id == B256::ZERO {
            return Err(InvoiceError::NotFound(id));
        }
        decode_record(record)
    }

    async fn invoices_by_payer(&self, payer: Address) -> Result<Vec<B256>, InvoiceError> {
        let registry = IInvoiceRegistry::new(self.config.registry, &self.provider);
        registry
            .getInvoicesByPayer(payer)
            .call()
            .await
            .map_err(|e| InvoiceError::ChainError(format!("getInvoicesByPayer failed: {e}")))
    }

    async fn invoices_by_payee(&self, payee: Address) -> Result<Vec<B256>, InvoiceError> {
        let registry = IInvoiceRegistry::new(self.config.registry, &self.provider);
        registry
            .getInvoicesByPayee(payee)
            .call()
            .await
            .map_err(|e| InvoiceError::ChainError(format!("getInvoicesByPayee failed: {e}")))
    }

    async fn approve(&self, spender: Spender, amount: U256) -> Result<(), InvoiceError> {
        let spender_address = self.spender_address(spender);
        let call = IERC20::approveCall {
            spender: spender_address,
            value: amount,
        };
        self.execute(
            self.config.usdc,
            IERC20::approveCall::SIGNATURE,
            vec![spender_address.to_string(), amount.to_string()],
            call.abi_encode(),
        )
        .await?;
        Ok(())
    }

    async fn allowance(&self, owner: Address, spender: Spender) -> Result<U256, InvoiceError> {
        let token = IERC20::new(self.config.usdc, &self.provider);
        token
            .allowance(owner, self.spender_address(spender))
            .call()
            .await
            .map_err(|e| InvoiceError::ChainError(format!("allowance failed: {e}")))
    }

    async fn pay_invoice_direct(&self, id: B256) -> Result<Settlement, InvoiceError> {
        let call = IPaymentProcessor::payInvoiceDirectCall { invoiceId: id };
        let handle = self
            .execute(
                self.config.processor,
                IPaymentProcessor::payInvoiceDirectCall::SIGNATURE,
                vec![id.to_string()],
                call.abi_encode(),
            )
            .await?;
        self.settled(id, &handle).await
    }

    async fn pay_invoice_via_gateway(
        &self,
        id: B256,
        attestation: &GatewayAttestation,
    ) -> Result<Settlement, InvoiceError> {
        let call = IPaymentProcessor::payInvoiceViaGatewayCall {
            invoiceId: id,
            attestation: attestation.attestation.clone(),
            attestationSignature: attestation.attestation_signature.clone(),
        };
        let handle = self
            .execute(
                self.config.processor,
                IPaymentProcessor::payInvoiceViaGatewayCall::SIGNATURE,
                vec![
                    id.to_string(),
                    format!("0x{}", alloy::hex::encode(&attestation.attestation)),
                    format!(
                        "0x{}",
                        alloy::hex::encode(&attestation.attestation_signature)
                    ),
                ],
                call.abi_encode(),
            )
            .await?;
        self.settled(id, &handle).await
    }

    async fn deposit(&self, payer_tag: &str, amount: U256) -> Result<(), InvoiceError> {
        let call = IAgentEscrow::depositCall {
            payerTag: payer_tag.to_string(),
            amount,
        };
        self.execute(
            self.config.escrow,
            IAgentEscrow::depositCall::SIGNATURE,
            vec![payer_tag.to_string(), amount.to_string()],
            call.abi_encode(),
        )
        .await?;
        Ok(())
    }

    async fn withdraw(&self, payer_tag: &str, amount: U256) -> Result<(), InvoiceError> {
        let call = IAgentEscrow::withdrawCall {
            payerTag: payer_tag.to_string(),
            amount,
        };
        self.execute(
            self.config.escrow,
            IAgentEscrow::withdrawCall::SIGNATURE,
            vec![payer_tag.to_string(), amount.to_string()],
            call.abi_encode(),
        )
        .await?;
        Ok(())
    }

    async fn set_spending_limit(&self, provider: Address, limit: U256) -> Result<(), InvoiceError> {
        let call = IAgentEscrow::setSpendingLimitCall { provider, limit };
        self.execute(
            self.config.escrow,
            IAgentEscrow::setSpendingLimitCall::SIGNATURE,
            vec![provider.to_string(), limit.to_string()],
            call.abi_encode(),
        )
        .await?;
        Ok(())
    }

    async fn execute_auto_payment(
        &self,
        _payer: Address,
        provider: Address,
        amount: U256,
        description: &str,
        usage_hash: B256,
        usage_signature: &Bytes,
    ) -> Result<AutoPayReceipt, InvoiceError> {
        let call = IAgentEscrow::executeAutoPaymentCall {
            provider,
            amount,
            description: description.to_string(),
            usageHash: usage_hash,
            usageSignature: usage_signature.clone(),
        };
        let handle = self
            .execute(
                self.config.escrow,
                IAgentEscrow::executeAutoPaymentCall::SIGNATURE,
                vec![
                    provider.to_string(),
                    amount.to_string(),
                    description.to_string(),
                    usage_hash.to_string(),
                    format!("0x{}", alloy::hex::encode(usage_signature)),
                ],
                call.abi_encode(),
            )
            .await?;

        // One transaction creates and settles the invoice; both events are
        // in its receipt.
        let receipt = self.receipt(&handle).await?;
        let logs = receipt
            .inner
            .as_receipt()
            .map(|r| r.logs.as_slice())
            .unwrap_or_default();
        let mut invoice_id = None;
        let mut paid_at = 0u64;
        for log in logs {
            if let Ok(decoded) = log.log_decode::<IInvoiceRegistry::InvoiceCreated>() {
                invoice_id = Some(decoded.inner.data.id);
            } else if let Ok(decoded) = log.log_decode::<IInvoiceRegistry::InvoicePaid>() {
                paid_at = decoded.inner.data.timestamp.saturating_to();
            }
        }
        let invoice_id = invoice_id.ok_or_else(|| {
            InvoiceError::ChainError(
                "auto payment confirmed but no InvoiceCreated event emitted".to_string(),
            )
        })?;
        if paid_at == 0 {
            return Err(InvoiceError::InvariantViolation(format!(
                "auto payment {handle} confirmed without an InvoicePaid event"
            )));
        }
        Ok(AutoPayReceipt {
            invoice_id,
            transaction: handle.id.clone(),
            paid_at,
        })
    }

    async fn escrow_info(&self, payer: Address) -> Result<EscrowInfo, InvoiceError> {
        let escrow = IAgentEscrow::new(self.config.escrow, &self.provider);
        let info = escrow
            .getEscrowInfo(payer)
            .call()
            .await
            .map_err(|e| InvoiceError::ChainError(format!("getEscrowInfo failed: {e}")))?;
        Ok(EscrowInfo {
            balance: info.balance,
            deposit_count: info.depositCount.saturating_to(),
            withdraw_count: info.withdrawCount.saturating_to(),
        })
    }

    async fn spending_info(
        &self,
        payer: Address,
        provider: Address,
    ) -> Result<SpendingInfo, InvoiceError> {
        let escrow = IAgentEscrow::new(self.config.escrow, &self.provider);
        let info = escrow
            .getSpendingInfo(payer, provider)
            .call()
            .await
            .map_err(|e| InvoiceError::ChainError(format!("getSpendingInfo failed: {e}")))?;
        Ok(SpendingInfo {
            limit: info.limit,
            spent: info.spent,
        })
    }

    async fn events(&self, from_block: u64) -> Result<Vec<InvoiceEvent>, InvoiceError> {
        let filter = Filter::new()
            .address(self.config.registry)
            .from_block(from_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| InvoiceError::ChainError(format!("get_logs failed: {e}")))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if let Ok(decoded) = log.log_decode::<IInvoiceRegistry::InvoiceCreated>() {
                let e = decoded.inner.data;
                events.push(InvoiceEvent::Created {
                    id: e.id,
                    payer: e.payer,
                    payee: e.payee,
                    amount: e.amount,
                    description: e.description,
                });
            } else if let Ok(decoded) = log.log_decode::<IInvoiceRegistry::InvoicePaid>() {
                let e = decoded.inner.data;
                events.push(InvoiceEvent::Paid {
                    id: e.id,
                    amount: e.amount,
                    timestamp: e.timestamp.saturating_to(),
                });
            } else if let Ok(decoded) = log.log_decode::<IInvoiceRegistry::InvoiceHeld>() {
                let e = decoded.inner.data;
                events.push(InvoiceEvent::Held {
                    id: e.id,
                    reason: e.reason,
                });
            }
            // Unknown registry logs are skipped, not an error.
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    #[test]
    fn test_call_signatures_match_deployed_abi() {
        assert_eq!(
            IInvoiceRegistry::createInvoiceCall::SIGNATURE,
            "createInvoice(address,address,uint256,string,bytes32,bytes)"
        );
        assert_eq!(
            IPaymentProcessor::payInvoiceDirectCall::SIGNATURE,
            "payInvoiceDirect(bytes32)"
        );
        assert_eq!(
            IPaymentProcessor::payInvoiceViaGatewayCall::SIGNATURE,
            "payInvoiceViaGateway(bytes32,bytes,bytes)"
        );
        assert_eq!(
            IAgentEscrow::depositCall::SIGNATURE,
            "deposit(string,uint256)"
        );
        assert_eq!(
            IAgentEscrow::withdrawCall::SIGNATURE,
            "withdraw(string,uint256)"
        );
        assert_eq!(
            IAgentEscrow::setSpendingLimitCall::SIGNATURE,
            "setSpendingLimit(address,uint256)"
        );
        assert_eq!(
            IAgentEscrow::executeAutoPaymentCall::SIGNATURE,
            "executeAutoPayment(address,uint256,string,bytes32,bytes)"
        );
        assert_eq!(IERC20::approveCall::SIGNATURE, "approve(address,uint256)");
    }

    #[test]
    fn test_decode_record() {
        let record = crate::InvoiceRecord {
            id: B256::repeat_byte(0x01),
            payer: Address::repeat_byte(0xaa),
            payee: Address::repeat_byte(0xbb),
            amount: U256::from(500_000u64),
            status: 1,
            description: "test".to_string(),
            usageHash: B256::ZERO,
            usageSignature: Bytes::new(),
            createdAt: U256::from(1_700_000_000u64),
            paidAt: U256::from(1_700_000_100u64),
            holdReason: String::new(),
        };
        let invoice = decode_record(record).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.paid_at, 1_700_000_100);
    }

    #[test]
    fn test_decode_record_rejects_inconsistent_state() {
        let record = crate::InvoiceRecord {
            id: B256::repeat_byte(0x01),
            payer: Address::repeat_byte(0xaa),
            payee: Address::repeat_byte(0xbb),
            amount: U256::from(1u64),
            status: 1, // PAID with paid_at == 0
            description: String::new(),
            usageHash: B256::ZERO,
            usageSignature: Bytes::new(),
            createdAt: U256::from(1u64),
            paidAt: U256::ZERO,
            holdReason: String::new(),
        };
        assert!(matches!(
            decode_record(record),
            Err(InvoiceError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_decode_record_rejects_unknown_status() {
        let record = crate::InvoiceRecord {
            id: B256::repeat_byte(0x01),
            payer: Address::repeat_byte(0xaa),
            payee: Address::repeat_byte(0xbb),
            amount: U256::from(1u64),
            status: 7,
            description: String::new(),
            usageHash: B256::ZERO,
            usageSignature: Bytes::new(),
            createdAt: U256::from(1u64),
            paidAt: U256::ZERO,
            holdReason: String::new(),
        };
        assert!(decode_record(record).is_err());
    }
}
