//! Invoice lifecycle, settlement, and escrow auto-pay for machine-generated
//! service invoices on Arc.
//!
//! Three settlement paths share one lifecycle state machine:
//!
//! - **Direct** — approve the payment processor, then `payInvoiceDirect`
//! - **Cross-chain** — sign a [`BurnIntent`], obtain a gateway attestation,
//!   then `payInvoiceViaGateway` on the destination chain
//! - **Autonomous** — pre-fund an escrow account with a per-provider
//!   spending limit; `executeAutoPayment` creates and pays the invoice in
//!   one indivisible ledger transaction
//!
//! The ledger is an injected collaborator behind the [`Ledger`] trait:
//! [`ContractLedger`] talks to the deployed contracts, [`InMemoryLedger`]
//! is a full-semantics fake for tests and local development.
//!
//! # Quick example (direct pay)
//!
//! ```no_run
//! use agent_invoice::{AgentInvoice, ChainConfig, GatewayClient, InMemoryLedger};
//! use alloy::primitives::{Address, U256};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ledger = InMemoryLedger::new();
//! let client = AgentInvoice::new(ledger, GatewayClient::testnet(), ChainConfig::default());
//!
//! let payer = Address::repeat_byte(0xaa);
//! let id = client
//!     .create_invoice(payer, Address::repeat_byte(0xbb), U256::from(500_000u64),
//!                     "api usage", &serde_json::json!({"calls": 42}))
//!     .await
//!     .unwrap();
//! let settlement = client.pay_invoice_direct(payer, id).await.unwrap();
//! # let _ = settlement;
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod units;

pub mod eip712;
pub mod invoice;
pub mod ledger;

pub mod contract;
pub mod gateway;
pub mod memory;
pub mod wallet;

pub mod facade;

use alloy::sol;

// EIP-712 struct for cross-chain burn intents. The sol! macro derives
// SolStruct, which provides eip712_signing_hash().
sol! {
    #[derive(Debug)]
    struct BurnIntent {
        address sourceSigner;
        uint256 sourceChain;
        uint256 destinationChain;
        address destinationRecipient;
        uint256 amount;
        uint256 maxBlockHeight;
        bytes32 nonce;
    }
}

// ERC-20 surface of the settlement asset (USDC), used for the allowance
// phase of direct pay and escrow deposits.
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
    }
}

// Invoice registry: the on-ledger source of truth for invoice records.
sol! {
    #[derive(Debug)]
    struct InvoiceRecord {
        bytes32 id;
        address payer;
        address payee;
        uint256 amount;
        uint8 status;
        string description;
        bytes32 usageHash;
        bytes usageSignature;
        uint256 createdAt;
        uint256 paidAt;
        string holdReason;
    }

    #[sol(rpc)]
    interface IInvoiceRegistry {
        function createInvoice(
            address payer,
            address payee,
            uint256 amount,
            string description,
            bytes32 usageHash,
            bytes usageSignature
        ) external returns (bytes32);
        function getInvoice(bytes32 invoiceId) external view returns (InvoiceRecord memory);
        function getInvoicesByPayer(address payer) external view returns (bytes32[] memory);
        function getInvoicesByPayee(address payee) external view returns (bytes32[] memory);

        event InvoiceCreated(
            bytes32 indexed id,
            address indexed payer,
            address indexed payee,
            uint256 amount,
            string description
        );
        event InvoicePaid(bytes32 indexed id, uint256 amount, uint256 timestamp);
        event InvoiceHeld(bytes32 indexed id, string reason);
    }
}

// Payment processor: pulls authorized funds and marks invoices paid.
sol! {
    #[sol(rpc)]
    interface IPaymentProcessor {
        function payInvoiceDirect(bytes32 invoiceId) external;
        function payInvoiceViaGateway(
            bytes32 invoiceId,
            bytes attestation,
            bytes attestationSignature
        ) external;
    }
}

// Escrow contract backing the autonomous payment path.
sol! {
    #[sol(rpc)]
    interface IAgentEscrow {
        function deposit(string payerTag, uint256 amount) external;
        function withdraw(string payerTag, uint256 amount) external;
        function setSpendingLimit(address provider, uint256 limit) external;
        function executeAutoPayment(
            address provider,
            uint256 amount,
            string description,
            bytes32 usageHash,
            bytes usageSignature
        ) external;
        function getEscrowInfo(address payer)
            external view returns (uint256 balance, uint256 depositCount, uint256 withdrawCount);
        function getSpendingInfo(address payer, address provider)
            external view returns (uint256 limit, uint256 spent);
    }
}

// Re-exports
pub use constants::{ChainConfig, ARC_CHAIN_ID, ARC_NETWORK, EXPIRY_BUFFER_BLOCKS, USDC_DECIMALS};
pub use error::InvoiceError;
pub use invoice::{usage_attestation, Invoice, InvoiceStatus, NewInvoice, UsagePolicy};
pub use ledger::{
    AutoPayReceipt, EscrowInfo, GatewayAttestation, InvoiceEvent, Ledger, Settlement, SpendingInfo,
    Spender,
};

pub use contract::ContractLedger;
pub use facade::AgentInvoice;
pub use gateway::{BurnIntentWire, GatewayClient, GatewayDomain, GatewayInfo};
pub use memory::InMemoryLedger;
pub use wallet::{await_confirmation, ContractCall, FeeLevel, ProviderWallet, TxHandle, TxState, WalletService};
