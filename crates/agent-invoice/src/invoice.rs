//! Invoice data model and lifecycle state machine.
//!
//! The lifecycle is: `Pending` (initial) → `Paid` (terminal, settlement only),
//! `Pending` → `Held` (policy pause) → `Pending` or `Cancelled`, and
//! `Pending`/`Held` → `Cancelled` (terminal). An invoice is never paid
//! directly from `Held`.

use alloy::primitives::{keccak256, utils::eip191_hash_message, Address, Bytes, Signature, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::InvoiceError;

/// Invoice lifecycle status.
///
/// The numeric values are the canonical on-ledger encoding and are used
/// everywhere status is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InvoiceStatus {
    Pending = 0,
    Paid = 1,
    Held = 2,
    Cancelled = 3,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Held => "HELD",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition(&self, to: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, to),
            (Pending, Paid) | (Pending, Held) | (Pending, Cancelled) | (Held, Pending) | (Held, Cancelled)
        )
    }
}

impl TryFrom<u8> for InvoiceStatus {
    type Error = InvoiceError;

    fn try_from(raw: u8) -> Result<Self, InvoiceError> {
        match raw {
            0 => Ok(InvoiceStatus::Pending),
            1 => Ok(InvoiceStatus::Paid),
            2 => Ok(InvoiceStatus::Held),
            3 => Ok(InvoiceStatus::Cancelled),
            other => Err(InvoiceError::InvariantViolation(format!(
                "unknown invoice status {other}"
            ))),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded claim that `payer` owes `payee` a fixed amount for a described
/// service. Identity fields are immutable after creation; only `status`,
/// `paid_at`, and `hold_reason` mutate, and only via the settlement protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: B256,
    pub payer: Address,
    pub payee: Address,
    pub amount: U256,
    pub status: InvoiceStatus,
    pub description: String,
    pub usage_hash: B256,
    pub usage_signature: Bytes,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds at the PAID transition; zero until then.
    pub paid_at: u64,
    /// Set only while status is HELD.
    pub hold_reason: String,
}

impl Invoice {
    /// Check the record-level invariant: `paid_at` is set iff status is PAID.
    ///
    /// A violation means the ledger state is corrupt for this invoice;
    /// callers must treat it as fatal rather than continue settling.
    pub fn check_consistency(&self) -> Result<(), InvoiceError> {
        let paid = self.status == InvoiceStatus::Paid;
        if paid != (self.paid_at != 0) {
            return Err(InvoiceError::InvariantViolation(format!(
                "invoice {}: status {} with paid_at {}",
                self.id, self.status, self.paid_at
            )));
        }
        Ok(())
    }
}

/// Parameters for creating a new invoice. Validated locally before any
/// ledger call — a rejected creation never reaches the chain.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub payer: Address,
    pub payee: Address,
    pub amount: U256,
    pub description: String,
    pub usage_hash: B256,
    pub usage_signature: Bytes,
}

impl NewInvoice {
    pub fn validate(&self) -> Result<(), InvoiceError> {
        if self.amount.is_zero() {
            return Err(InvoiceError::Validation(
                "invoice amount must be greater than zero".to_string(),
            ));
        }
        if self.payer == Address::ZERO {
            return Err(InvoiceError::Validation(
                "payer address cannot be zero".to_string(),
            ));
        }
        if self.payee == Address::ZERO {
            return Err(InvoiceError::Validation(
                "payee address cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hash off-ledger usage data into the attestation recorded on the invoice.
/// Returns the keccak256 hash and the canonical JSON it covers.
pub fn usage_attestation(usage: &serde_json::Value) -> Result<(B256, String), InvoiceError> {
    let canonical = serde_json::to_string(usage)?;
    Ok((keccak256(canonical.as_bytes()), canonical))
}

/// Policy for the provider's signature over the usage attestation.
///
/// `Skip` accepts unsigned usage data and is the observed production
/// behavior — a trust downgrade: the payer cannot verify what was actually
/// consumed. `Enforce` requires a valid EIP-191 signature over the usage
/// hash from the payee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsagePolicy {
    #[default]
    Skip,
    Enforce,
}

impl UsagePolicy {
    /// Verify `signature` over `usage_hash` against the expected signer.
    pub fn verify(
        &self,
        usage_hash: B256,
        signature: &Bytes,
        expected_signer: Address,
    ) -> Result<(), InvoiceError> {
        match self {
            UsagePolicy::Skip => Ok(()),
            UsagePolicy::Enforce => {
                if signature.len() != 65 {
                    return Err(InvoiceError::SignatureError(format!(
                        "usage signature must be 65 bytes, got {}",
                        signature.len()
                    )));
                }
                let sig = Signature::from_raw(signature).map_err(|e| {
                    InvoiceError::SignatureError(format!("invalid usage signature: {e}"))
                })?;
                let message_hash = eip191_hash_message(usage_hash);
                let recovered = sig.recover_address_from_prehash(&message_hash).map_err(|e| {
                    InvoiceError::SignatureError(format!("usage signature recovery failed: {e}"))
                })?;
                if recovered != expected_signer {
                    return Err(InvoiceError::SignatureError(format!(
                        "usage signature signed by {recovered}, expected {expected_signer}"
                    )));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn sample(status: InvoiceStatus, paid_at: u64) -> Invoice {
        Invoice {
            id: B256::repeat_byte(0x11),
            payer: Address::repeat_byte(0xaa),
            payee: Address::repeat_byte(0xbb),
            amount: U256::from(500_000u64),
            status,
            description: "unit test".to_string(),
            usage_hash: B256::ZERO,
            usage_signature: Bytes::new(),
            created_at: 1_700_000_000,
            paid_at,
            hold_reason: String::new(),
        }
    }

    #[test]
    fn test_status_transitions() {
        use InvoiceStatus::*;
        assert!(Pending.can_transition(Paid));
        assert!(Pending.can_transition(Held));
        assert!(Pending.can_transition(Cancelled));
        assert!(Held.can_transition(Pending));
        assert!(Held.can_transition(Cancelled));

        // Never paid from HELD, terminals stay terminal.
        assert!(!Held.can_transition(Paid));
        assert!(!Paid.can_transition(Pending));
        assert!(!Cancelled.can_transition(Pending));
        assert!(!Cancelled.can_transition(Paid));
    }

    #[test]
    fn test_status_decode_roundtrip() {
        for raw in 0u8..4 {
            let status = InvoiceStatus::try_from(raw).unwrap();
            assert_eq!(status as u8, raw);
        }
        assert!(InvoiceStatus::try_from(4).is_err());
    }

    #[test]
    fn test_paid_at_consistency() {
        assert!(sample(InvoiceStatus::Pending, 0).check_consistency().is_ok());
        assert!(sample(InvoiceStatus::Paid, 1_700_000_100).check_consistency().is_ok());

        assert!(sample(InvoiceStatus::Paid, 0).check_consistency().is_err());
        assert!(sample(InvoiceStatus::Pending, 1_700_000_100)
            .check_consistency()
            .is_err());
    }

    #[test]
    fn test_new_invoice_validation() {
        let good = NewInvoice {
            payer: Address::repeat_byte(0xaa),
            payee: Address::repeat_byte(0xbb),
            amount: U256::from(1u64),
            description: String::new(),
            usage_hash: B256::ZERO,
            usage_signature: Bytes::new(),
        };
        assert!(good.validate().is_ok());

        let mut zero_amount = good.clone();
        zero_amount.amount = U256::ZERO;
        assert!(zero_amount.validate().is_err());

        let mut zero_payer = good.clone();
        zero_payer.payer = Address::ZERO;
        assert!(zero_payer.validate().is_err());
    }

    #[test]
    fn test_usage_attestation_deterministic() {
        let data = serde_json::json!({"tokens": 1200, "model": "small"});
        let (h1, json1) = usage_attestation(&data).unwrap();
        let (h2, json2) = usage_attestation(&data).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(json1, json2);
        assert_eq!(h1, keccak256(json1.as_bytes()));
    }

    #[test]
    fn test_usage_policy_skip_accepts_empty() {
        UsagePolicy::Skip
            .verify(B256::ZERO, &Bytes::new(), Address::ZERO)
            .unwrap();
    }

    #[test]
    fn test_usage_policy_enforce() {
        let signer = PrivateKeySigner::random();
        let hash = keccak256(b"usage data");
        let sig = signer.sign_message_sync(hash.as_slice()).unwrap();
        let sig_bytes = Bytes::from(sig.as_bytes().to_vec());

        UsagePolicy::Enforce
            .verify(hash, &sig_bytes, signer.address())
            .unwrap();

        // Wrong signer rejected.
        let other = PrivateKeySigner::random();
        assert!(UsagePolicy::Enforce
            .verify(hash, &sig_bytes, other.address())
            .is_err());

        // Empty signature rejected under Enforce.
        assert!(UsagePolicy::Enforce
            .verify(hash, &Bytes::new(), signer.address())
            .is_err());
    }
}
