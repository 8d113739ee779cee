use alloy::primitives::Address;

/// Arc testnet chain ID.
pub const ARC_CHAIN_ID: u64 = 5042002;

/// CAIP-2 network identifier for Arc testnet.
pub const ARC_NETWORK: &str = "eip155:5042002";

/// USDC has 6 decimal places.
pub const USDC_DECIMALS: u8 = 6;

/// Default RPC endpoint for Arc testnet.
pub const RPC_URL: &str = "https://rpc.testnet.arc.network";

/// Block explorer base URL.
pub const EXPLORER_BASE: &str = "https://testnet.arcscan.app";

/// Gateway attestation API (testnet).
pub const GATEWAY_API_TESTNET: &str = "https://gateway-api-testnet.circle.com";

/// Gateway attestation API (mainnet).
pub const GATEWAY_API_MAINNET: &str = "https://gateway-api.circle.com";

/// EIP-712 domain name under which burn intents are signed.
pub const BURN_INTENT_DOMAIN_NAME: &str = "CircleGateway";

/// EIP-712 domain version for burn intents.
pub const BURN_INTENT_DOMAIN_VERSION: &str = "1";

/// Blocks added to the gateway-reported expiration height when building a
/// burn intent. Gives the attestation round trip room to complete before
/// the intent hard-expires on the destination chain.
pub const EXPIRY_BUFFER_BLOCKS: u64 = 100;

/// Runtime chain configuration. Decouples the ledger gateway and settlement
/// flows from compile-time constants, and carries the deployed contract
/// addresses (these differ per deployment, so there are no meaningful
/// compile-time defaults for them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub network: String,
    pub rpc_url: String,
    pub explorer_base: String,
    pub gateway_api: String,
    /// USDC (settlement asset) token contract.
    pub usdc: Address,
    /// Invoice registry contract.
    pub registry: Address,
    /// Payment processor contract.
    pub processor: Address,
    /// Escrow contract for autonomous payments.
    pub escrow: Address,
}

impl Default for ChainConfig {
    /// Defaults to Arc testnet with unset contract addresses.
    fn default() -> Self {
        Self {
            chain_id: ARC_CHAIN_ID,
            network: ARC_NETWORK.to_string(),
            rpc_url: RPC_URL.to_string(),
            explorer_base: EXPLORER_BASE.to_string(),
            gateway_api: GATEWAY_API_TESTNET.to_string(),
            usdc: Address::ZERO,
            registry: Address::ZERO,
            processor: Address::ZERO,
            escrow: Address::ZERO,
        }
    }
}

impl ChainConfig {
    pub fn with_contracts(
        mut self,
        usdc: Address,
        registry: Address,
        processor: Address,
        escrow: Address,
    ) -> Self {
        self.usdc = usdc;
        self.registry = registry;
        self.processor = processor;
        self.escrow = escrow;
        self
    }

    /// Explorer link for a transaction hash.
    pub fn explorer_tx(&self, tx: &str) -> String {
        format!("{}/tx/{}", self.explorer_base, tx)
    }
}
