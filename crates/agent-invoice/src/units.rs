//! USDC fixed-point helpers. All amounts in this crate are denominated in
//! the token's smallest unit (6 decimals).

use alloy::primitives::{
    utils::{format_units, parse_units, ParseUnits},
    U256,
};

use crate::constants::USDC_DECIMALS;
use crate::error::InvoiceError;

/// Parse a human-readable USDC amount ("1.5") into smallest units.
pub fn parse_usdc(amount: &str) -> Result<U256, InvoiceError> {
    let parsed = parse_units(amount, USDC_DECIMALS)
        .map_err(|e| InvoiceError::Validation(format!("invalid amount '{amount}': {e}")))?;
    // Signed input parses into the I256 variant; converting it to U256
    // would bit-cast a negative into a huge allowance.
    match parsed {
        ParseUnits::U256(value) => Ok(value),
        ParseUnits::I256(_) => Err(InvoiceError::Validation(format!(
            "negative amount '{amount}'"
        ))),
    }
}

/// Format smallest-unit USDC for display ("1.500000").
pub fn format_usdc(amount: U256) -> String {
    format_units(amount, USDC_DECIMALS).unwrap_or_else(|_| amount.to_string())
}

/// Shorten an address-like hex string for logs and CLI output (0x1234...5678).
pub fn short_hex(s: &str) -> String {
    if s.len() <= 12 {
        return s.to_string();
    }
    format!("{}...{}", &s[..6], &s[s.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usdc() {
        assert_eq!(parse_usdc("1").unwrap(), U256::from(1_000_000u64));
        assert_eq!(parse_usdc("0.5").unwrap(), U256::from(500_000u64));
        assert_eq!(parse_usdc("0.000001").unwrap(), U256::from(1u64));
    }

    #[test]
    fn test_parse_usdc_rejects_garbage() {
        assert!(parse_usdc("abc").is_err());
    }

    #[test]
    fn test_parse_usdc_rejects_negative() {
        // A signed amount must fail validation, never wrap into a huge
        // unsigned value.
        for input in ["-1", "-0.5", "-0.000001"] {
            let err = parse_usdc(input).unwrap_err();
            assert!(matches!(err, InvoiceError::Validation(_)), "{input}");
        }
    }

    #[test]
    fn test_format_usdc() {
        assert_eq!(format_usdc(U256::from(1_500_000u64)), "1.500000");
    }

    #[test]
    fn test_short_hex() {
        let addr = "0x1234567890abcdef1234567890abcdef12345678";
        assert_eq!(short_hex(addr), "0x1234...5678");
        assert_eq!(short_hex("0xabc"), "0xabc");
    }
}
