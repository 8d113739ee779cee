//! EIP-712 typed-data signing for burn intents, attester signature
//! verification, and nonce generation.
//!
//! A burn intent is signed under a domain bound to the *source* chain id,
//! so a signature collected for one network can never be replayed on
//! another.

use alloy::primitives::{keccak256, Address, FixedBytes, Signature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::SolStruct;

use crate::constants::{BURN_INTENT_DOMAIN_NAME, BURN_INTENT_DOMAIN_VERSION};
use crate::error::InvoiceError;
use crate::BurnIntent;

/// Build the EIP-712 domain for burn intents on a given source chain.
pub fn burn_intent_domain(source_chain: u64) -> alloy::sol_types::Eip712Domain {
    alloy::sol_types::Eip712Domain {
        name: Some(std::borrow::Cow::Borrowed(BURN_INTENT_DOMAIN_NAME)),
        version: Some(std::borrow::Cow::Borrowed(BURN_INTENT_DOMAIN_VERSION)),
        chain_id: Some(U256::from(source_chain)),
        verifying_contract: Some(Address::ZERO),
        salt: None,
    }
}

/// Compute the EIP-712 signing hash of a burn intent.
pub fn signing_hash(intent: &BurnIntent) -> B256 {
    let chain: u64 = intent.sourceChain.saturating_to();
    let domain = burn_intent_domain(chain);
    intent.eip712_signing_hash(&domain)
}

/// Sign a burn intent with the payer's key. Returns the 65-byte signature.
pub fn sign_burn_intent(
    intent: &BurnIntent,
    signer: &PrivateKeySigner,
) -> Result<Signature, InvoiceError> {
    let hash = signing_hash(intent);
    signer
        .sign_hash_sync(&hash)
        .map_err(|e| InvoiceError::SignatureError(format!("burn intent signing failed: {e}")))
}

/// secp256k1 curve order N / 2 — signatures with s > this are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Parse a raw 65-byte signature, rejecting high-s forms.
fn parse_signature(signature_bytes: &[u8]) -> Result<Signature, InvoiceError> {
    if signature_bytes.len() != 65 {
        return Err(InvoiceError::SignatureError(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        )));
    }
    let sig = Signature::from_raw(signature_bytes)
        .map_err(|e| InvoiceError::SignatureError(format!("invalid signature: {e}")))?;
    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(InvoiceError::SignatureError(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }
    Ok(sig)
}

/// Recover the signer of a burn intent signature and check it matches the
/// intent's `sourceSigner`.
pub fn verify_burn_intent_signature(
    intent: &BurnIntent,
    signature_bytes: &[u8],
) -> Result<Address, InvoiceError> {
    let sig = parse_signature(signature_bytes)?;
    let hash = signing_hash(intent);
    let recovered = sig
        .recover_address_from_prehash(&hash)
        .map_err(|e| InvoiceError::SignatureError(format!("recovery failed: {e}")))?;
    if recovered != intent.sourceSigner {
        return Err(InvoiceError::SignatureError(format!(
            "burn intent signed by {recovered}, expected {}",
            intent.sourceSigner
        )));
    }
    Ok(recovered)
}

/// Verify the gateway attester's signature over raw attestation bytes.
///
/// The attester signs `keccak256(attestation)`; the destination-chain
/// processor accepts the attestation only if the recovered address matches
/// its configured attester.
pub fn verify_attester_signature(
    attestation: &[u8],
    signature_bytes: &[u8],
    expected_attester: Address,
) -> Result<(), InvoiceError> {
    let sig = parse_signature(signature_bytes)
        .map_err(|e| InvoiceError::BadAttestation(e.to_string()))?;
    let hash = keccak256(attestation);
    let recovered = sig
        .recover_address_from_prehash(&hash)
        .map_err(|e| InvoiceError::BadAttestation(format!("recovery failed: {e}")))?;
    if recovered != expected_attester {
        return Err(InvoiceError::BadAttestation(format!(
            "attestation signed by {recovered}, expected {expected_attester}"
        )));
    }
    Ok(())
}

/// Generate a random 32-byte nonce (keccak256 of 32 random bytes).
/// Uses `rand::fill` which delegates to the OS CSPRNG.
pub fn random_nonce() -> FixedBytes<32> {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    keccak256(bytes)
}

/// Encode a signature to a hex string with 0x prefix (65 bytes -> 0x + 130 hex).
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent(signer: Address) -> BurnIntent {
        BurnIntent {
            sourceSigner: signer,
            sourceChain: U256::from(11155111u64),
            destinationChain: U256::from(crate::constants::ARC_CHAIN_ID),
            destinationRecipient: Address::repeat_byte(0xbb),
            amount: U256::from(500_000u64),
            maxBlockHeight: U256::from(9_000_000u64),
            nonce: random_nonce(),
        }
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let signer = PrivateKeySigner::random();
        let intent = sample_intent(signer.address());

        let sig = sign_burn_intent(&intent, &signer).unwrap();
        let recovered = verify_burn_intent_signature(&intent, &sig.as_bytes()).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_wrong_source_signer_rejected() {
        let signer = PrivateKeySigner::random();
        let mut intent = sample_intent(Address::repeat_byte(0x77));
        let sig = sign_burn_intent(&intent, &signer).unwrap();
        assert!(verify_burn_intent_signature(&intent, &sig.as_bytes()).is_err());

        intent.sourceSigner = signer.address();
        let sig = sign_burn_intent(&intent, &signer).unwrap();
        assert!(verify_burn_intent_signature(&intent, &sig.as_bytes()).is_ok());
    }

    #[test]
    fn test_domain_binds_source_chain() {
        let signer = PrivateKeySigner::random();
        let intent = sample_intent(signer.address());
        let sig = sign_burn_intent(&intent, &signer).unwrap();

        // Same intent re-targeted at another source chain must not verify
        // with the original signature.
        let mut other = intent.clone();
        other.sourceChain = U256::from(8453u64);
        assert!(verify_burn_intent_signature(&other, &sig.as_bytes()).is_err());
    }

    #[test]
    fn test_attester_signature() {
        let attester = PrivateKeySigner::random();
        let attestation = b"attestation payload".to_vec();
        let sig = attester
            .sign_hash_sync(&keccak256(&attestation))
            .unwrap();

        verify_attester_signature(&attestation, &sig.as_bytes(), attester.address()).unwrap();

        let other = PrivateKeySigner::random();
        let err =
            verify_attester_signature(&attestation, &sig.as_bytes(), other.address()).unwrap_err();
        assert!(matches!(err, InvoiceError::BadAttestation(_)));
    }

    #[test]
    fn test_random_nonce_is_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let signer = PrivateKeySigner::random();
        let intent = sample_intent(signer.address());
        assert!(verify_burn_intent_signature(&intent, &[0u8; 64]).is_err());
    }
}
