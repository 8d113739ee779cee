use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;

use agent_invoice::units::{format_usdc, parse_usdc, short_hex};
use agent_invoice::wallet::ProviderWallet;
use agent_invoice::{AgentInvoice, ChainConfig, ContractLedger, GatewayClient, InvoiceEvent};

fn usage() -> ! {
    eprintln!(
        "Usage: agent-invoice <command> [args]\n\
         \n\
         Commands:\n\
         create <payer> <payee> <usdc-amount> <description> [usage-json]\n\
         status <invoice-id>\n\
         list <payer|payee> <address>\n\
         pay <invoice-id>\n\
         pay-gateway <invoice-id> <source-chain-id>\n\
         deposit <tag> <usdc-amount>\n\
         withdraw <tag> <usdc-amount>\n\
         limit <provider> <usdc-amount>\n\
         auto-pay <provider> <usdc-amount> <description> [usage-json]\n\
         escrow <payer> [provider]\n\
         events <from-block>\n\
         setup\n\
         \n\
         Environment: EVM_PRIVATE_KEY (required), REGISTRY_ADDRESS, \n\
         PROCESSOR_ADDRESS, ESCROW_ADDRESS, USDC_ADDRESS (required),\n\
         RPC_URL, GATEWAY_API_URL (optional)"
    );
    std::process::exit(2);
}

fn env_address(name: &str) -> Address {
    std::env::var(name)
        .unwrap_or_else(|_| panic!("{name} environment variable is required"))
        .parse()
        .unwrap_or_else(|_| panic!("invalid {name}"))
}

fn parse_id(s: &str) -> B256 {
    s.parse().expect("invalid invoice id -- expected 0x-prefixed bytes32")
}

fn parse_addr(s: &str) -> Address {
    s.parse().expect("invalid address")
}

fn parse_amount(s: &str) -> alloy::primitives::U256 {
    parse_usdc(s).expect("invalid USDC amount -- e.g. 0.50")
}

fn parse_usage(arg: Option<&String>) -> serde_json::Value {
    match arg {
        Some(raw) => serde_json::from_str(raw).expect("invalid usage JSON"),
        None => serde_json::json!({}),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or_else(|| usage());

    let private_key =
        std::env::var("EVM_PRIVATE_KEY").expect("EVM_PRIVATE_KEY environment variable is required");
    let signer: PrivateKeySigner = private_key.parse().expect("invalid EVM_PRIVATE_KEY");
    let caller = signer.address();

    let mut config = ChainConfig::default().with_contracts(
        env_address("USDC_ADDRESS"),
        env_address("REGISTRY_ADDRESS"),
        env_address("PROCESSOR_ADDRESS"),
        env_address("ESCROW_ADDRESS"),
    );
    if let Ok(rpc_url) = std::env::var("RPC_URL") {
        config.rpc_url = rpc_url;
    }
    if let Ok(gateway_api) = std::env::var("GATEWAY_API_URL") {
        config.gateway_api = gateway_api;
    }

    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer.clone()))
        .connect_http(config.rpc_url.parse().expect("invalid RPC_URL"));

    let ledger = ContractLedger::new(
        provider.clone(),
        ProviderWallet::new(provider),
        config.clone(),
    );
    let client = AgentInvoice::new(ledger, GatewayClient::new(&config.gateway_api), config.clone());

    match command {
        "create" => {
            if args.len() < 6 {
                usage();
            }
            let payer = parse_addr(&args[2]);
            let payee = parse_addr(&args[3]);
            let amount = parse_amount(&args[4]);
            let usage_data = parse_usage(args.get(6));

            let id = client
                .create_invoice(payer, payee, amount, &args[5], &usage_data)
                .await
                .expect("invoice creation failed");
            println!("Invoice created: {id}");
        }
        "status" => {
            if args.len() < 3 {
                usage();
            }
            let invoice = client
                .invoice(parse_id(&args[2]))
                .await
                .expect("invoice lookup failed");
            println!("Invoice {0}", invoice.id);
            println!("  Payer:       {}", invoice.payer);
            println!("  Payee:       {}", invoice.payee);
            println!("  Amount:      {} USDC", format_usdc(invoice.amount));
            println!("  Status:      {}", invoice.status);
            println!("  Description: {}", invoice.description);
            if invoice.paid_at > 0 {
                println!("  Paid at:     {}", invoice.paid_at);
            }
            if !invoice.hold_reason.is_empty() {
                println!("  Hold reason: {}", invoice.hold_reason);
            }
        }
        "list" => {
            if args.len() < 4 {
                usage();
            }
            let address = parse_addr(&args[3]);
            let ids = match args[2].as_str() {
                "payer" => client.invoices_by_payer(address).await,
                "payee" => client.invoices_by_payee(address).await,
                _ => usage(),
            }
            .expect("invoice listing failed");
            println!("{} invoice(s) for {address}", ids.len());
            for id in ids {
                println!("  {id}");
            }
        }
        "pay" => {
            if args.len() < 3 {
                usage();
            }
            let settlement = client
                .pay_invoice_direct(caller, parse_id(&args[2]))
                .await
                .expect("direct payment failed");
            println!("Paid at {}", settlement.paid_at);
            println!("  tx: {}", config.explorer_tx(&settlement.transaction));
        }
        "pay-gateway" => {
            if args.len() < 4 {
                usage();
            }
            let source_chain: u64 = args[3].parse().expect("invalid source chain id");
            println!(
                "Settling via gateway (estimated {}s)...",
                client.transfer_estimate_secs(source_chain)
            );
            let settlement = client
                .pay_invoice_via_gateway(parse_id(&args[2]), &signer, source_chain)
                .await
                .expect("gateway payment failed");
            println!("Paid at {}", settlement.paid_at);
            println!("  tx: {}", config.explorer_tx(&settlement.transaction));
        }
        "deposit" => {
            if args.len() < 4 {
                usage();
            }
            let amount = parse_amount(&args[3]);
            client
                .fund_escrow(&args[2], amount)
                .await
                .expect("escrow deposit failed");
            println!("Deposited {} USDC into escrow", format_usdc(amount));
        }
        "withdraw" => {
            if args.len() < 4 {
                usage();
            }
            let amount = parse_amount(&args[3]);
            client
                .withdraw(&args[2], amount)
                .await
                .expect("escrow withdrawal failed");
            println!("Withdrew {} USDC from escrow", format_usdc(amount));
        }
        "limit" => {
            if args.len() < 4 {
                usage();
            }
            let provider_address = parse_addr(&args[2]);
            let limit = parse_amount(&args[3]);
            client
                .set_spending_limit(provider_address, limit)
                .await
                .expect("setting spending limit failed");
            println!(
                "Spending limit for {provider_address} set to {} USDC",
                format_usdc(limit)
            );
        }
        "auto-pay" => {
            if args.len() < 5 {
                usage();
            }
            let provider_address = parse_addr(&args[2]);
            let amount = parse_amount(&args[3]);
            let usage_data = parse_usage(args.get(5));

            let receipt = client
                .auto_pay(caller, provider_address, amount, &args[4], &usage_data)
                .await
                .expect("auto payment failed");
            println!("Auto payment executed");
            println!("  Invoice: {}", receipt.invoice_id);
            println!("  Paid at: {}", receipt.paid_at);
            println!("  tx:      {}", config.explorer_tx(&receipt.transaction));
        }
        "escrow" => {
            if args.len() < 3 {
                usage();
            }
            let payer = parse_addr(&args[2]);
            let info = client
                .escrow_info(payer)
                .await
                .expect("escrow lookup failed");
            println!("Escrow for {payer}");
            println!("  Balance:     {} USDC", format_usdc(info.balance));
            println!("  Deposits:    {}", info.deposit_count);
            println!("  Withdrawals: {}", info.withdraw_count);
            if let Some(provider_arg) = args.get(3) {
                let spending = client
                    .spending_info(payer, parse_addr(provider_arg))
                    .await
                    .expect("spending lookup failed");
                println!("  Limit:       {} USDC", format_usdc(spending.limit));
                println!("  Spent:       {} USDC", format_usdc(spending.spent));
            }
        }
        "events" => {
            if args.len() < 3 {
                usage();
            }
            let from_block: u64 = args[2].parse().expect("invalid block number");
            let events = client
                .events(from_block)
                .await
                .expect("event query failed");
            for event in events {
                match event {
                    InvoiceEvent::Created {
                        id,
                        payer,
                        payee,
                        amount,
                        description,
                    } => println!(
                        "CREATED {id} payer={} payee={} amount={} \"{description}\"",
                        short_hex(&payer.to_string()),
                        short_hex(&payee.to_string()),
                        format_usdc(amount)
                    ),
                    InvoiceEvent::Paid { id, amount, timestamp } => {
                        println!("PAID    {id} amount={} at={timestamp}", format_usdc(amount))
                    }
                    InvoiceEvent::Held { id, reason } => {
                        println!("HELD    {id} reason=\"{reason}\"")
                    }
                }
            }
        }
        "setup" => {
            println!("Signer:    {caller}");
            println!("Network:   {} (chain id {})", config.network, config.chain_id);
            println!("RPC:       {}", config.rpc_url);
            println!("Gateway:   {}", config.gateway_api);
            println!("Registry:  {}", config.registry);
            println!("Processor: {}", config.processor);
            println!("Escrow:    {}", config.escrow);
            println!("USDC:      {}", config.usdc);

            let gateway = GatewayClient::new(&config.gateway_api);
            match gateway.usdc_address(config.chain_id).await {
                Ok(Some(usdc)) => {
                    println!("\nGateway supports chain {} (USDC {usdc})", config.chain_id);
                    if usdc != config.usdc {
                        eprintln!("WARNING: USDC_ADDRESS does not match the gateway's address");
                    }
                }
                Ok(None) => eprintln!(
                    "\nWARNING: gateway does not list chain {} -- cross-chain settlement \
                     to this network will fail",
                    config.chain_id
                ),
                Err(e) => eprintln!("\nWARNING: gateway unreachable: {e}"),
            }
        }
        _ => usage(),
    }
}
