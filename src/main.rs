//! delegated-transfer command line
//!
//! Thin wrapper over the library: every subcommand loads the configuration,
//! connects to the configured RPC endpoint and runs one operation. Only the
//! credential of the party a command acts for has to be configured.
//!
//! The delegated flow is split across two invocations, usually on two
//! machines:
//!
//! ```text
//! sender$    delegated-transfer prepare --to <RECIPIENT> --amount 10 --fee-payer <PAYER>
//! fee payer$ delegated-transfer complete --payload <BASE64>
//! ```

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delegated_transfer::{
    config::{Config, Party},
    ledger::{LedgerClient, RpcLedger},
    metrics::metrics,
    nonce::NonceManager,
    protocol::{FeePayerSession, SenderSession},
    token::{MetadataFields, TokenAdmin},
    tx_builder::{format_ui_amount, parse_ui_amount, AnchorMode, TransferIntent, NATIVE_DECIMALS},
    wallet::WalletManager,
};
use solana_sdk::{pubkey::Pubkey, signature::Signer};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "delegated-transfer.toml", env = "DELEGATED_TRANSFER_CONFIG")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the native balance of an address (the sender by default)
    Balance {
        #[arg(long)]
        address: Option<Pubkey>,
    },
    /// Request test funds for the sender
    Airdrop {
        /// Amount in whole coins
        #[arg(long, default_value = "1")]
        amount: String,
    },
    /// Create a mint controlled by the sender
    CreateMint {
        #[arg(long, default_value_t = 9)]
        decimals: u8,
    },
    /// Mint whole units to an owner's holding account
    MintTo {
        #[arg(long)]
        mint: Option<Pubkey>,
        #[arg(long)]
        to: Pubkey,
        #[arg(long)]
        amount: String,
        /// Mint authority is this multisig instead of the sender
        #[arg(long)]
        multisig: Option<Pubkey>,
        /// Keypair file of a multisig member; repeat up to the threshold
        #[arg(long = "signer-keypair", requires = "multisig")]
        signer_keypairs: Vec<String>,
    },
    /// Create an M-of-N multisig usable as mint authority
    CreateMultisig {
        /// Member address; repeat for each member
        #[arg(long = "signer", required = true)]
        signers: Vec<Pubkey>,
        /// Number of member signatures required
        #[arg(long)]
        threshold: u8,
    },
    /// Attach name, symbol and URI to a mint the sender controls
    CreateMetadata {
        #[arg(long)]
        mint: Option<Pubkey>,
        #[command(flatten)]
        fields: MetadataArgs,
    },
    /// Replace the metadata of a mint whose update authority is the sender
    UpdateMetadata {
        #[arg(long)]
        mint: Option<Pubkey>,
        #[command(flatten)]
        fields: MetadataArgs,
    },
    /// Create a durable nonce account controlled by the sender
    CreateNonce,
    /// Advance a nonce, revoking every payload anchored to its current token
    AdvanceNonce {
        #[arg(long)]
        nonce: Option<Pubkey>,
    },
    /// Transfer paying the fee yourself
    Send {
        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Build and sign a transfer for another party to pay, printing the payload
    Prepare {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Address that will pay the fee
        #[arg(long)]
        fee_payer: Pubkey,
        /// Anchor to this durable nonce instead of a recent blockhash
        #[arg(long)]
        nonce: Option<Pubkey>,
        /// Anchor to the configured durable nonce
        #[arg(long, conflicts_with = "nonce")]
        durable: bool,
    },
    /// Co-sign a prepared payload as fee payer and submit it
    Complete {
        /// Base64 payload, or `@path` to read it from a file
        #[arg(long)]
        payload: String,
    },
    /// Close the sender's empty holding account
    CloseAccount {
        #[arg(long)]
        mint: Option<Pubkey>,
    },
}

#[derive(clap::Args, Debug)]
struct TransferArgs {
    #[arg(long)]
    to: Pubkey,
    /// Amount in whole units, e.g. `10` or `0.25`
    #[arg(long)]
    amount: String,
    /// Token mint; native coin when absent and none is configured
    #[arg(long)]
    mint: Option<Pubkey>,
    /// Send the native coin even when a mint is configured
    #[arg(long, conflicts_with = "mint")]
    native: bool,
    #[arg(long)]
    memo: Option<String>,
}

#[derive(clap::Args, Debug)]
struct MetadataArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    uri: String,
    /// Royalty on secondary sales in basis points
    #[arg(long, default_value_t = 0)]
    seller_fee_basis_points: u16,
}

impl From<MetadataArgs> for MetadataFields {
    fn from(args: MetadataArgs) -> Self {
        MetadataFields::new(args.name, args.symbol, args.uri)
            .with_seller_fee(args.seller_fee_basis_points)
    }
}

impl Command {
    /// Party whose credential the command signs with, if any
    fn party(&self) -> Option<Party> {
        match self {
            Command::Balance { address: Some(_) } => None,
            Command::Complete { .. } => Some(Party::FeePayer),
            _ => Some(Party::Sender),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config);
    init_logging(args.verbose, config.monitoring.json_logs);
    config.validate().context("Invalid configuration")?;
    if let Some(party) = args.command.party() {
        config.key_source(party).context("Invalid configuration")?;
    }

    info!(rpc = %config.rpc.url, commitment = %config.rpc.commitment, "connecting");
    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::from_config(&config)?);

    let result = run(args.command, &config, ledger).await;

    if config.monitoring.print_metrics {
        match metrics().render() {
            Ok(text) => eprintln!("{}", text),
            Err(e) => warn!("Failed to render metrics: {}", e),
        }
    }
    result
}

async fn run(command: Command, config: &Config, ledger: Arc<dyn LedgerClient>) -> Result<()> {
    match command {
        Command::Balance { address } => {
            let address = match address {
                Some(address) => address,
                None => load_wallet(config, Party::Sender)?.pubkey(),
            };
            let lamports = ledger.balance(&address).await?;
            println!("{} {}", address, format_ui_amount(lamports, NATIVE_DECIMALS));
        }
        Command::Airdrop { amount } => {
            let sender = load_wallet(config, Party::Sender)?;
            let lamports = parse_ui_amount(&amount, NATIVE_DECIMALS)?;
            let balance = TokenAdmin::new(ledger).airdrop(&sender.pubkey(), lamports).await?;
            println!("{}", format_ui_amount(balance, NATIVE_DECIMALS));
        }
        Command::CreateMint { decimals } => {
            let sender = load_wallet(config, Party::Sender)?;
            let mint = TokenAdmin::new(ledger)
                .create_mint(sender.signer(), &sender.pubkey(), decimals)
                .await?;
            println!("{}", mint.address);
        }
        Command::MintTo {
            mint,
            to,
            amount,
            multisig,
            signer_keypairs,
        } => {
            let sender = load_wallet(config, Party::Sender)?;
            let mint = resolve_mint(mint, config)?.context("No mint given or configured")?;
            let admin = TokenAdmin::new(ledger);
            let outcome = match multisig {
                Some(multisig) => {
                    let members = signer_keypairs
                        .iter()
                        .map(|path| {
                            WalletManager::from_file(path)
                                .with_context(|| format!("Failed to load multisig signer {}", path))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let signers: Vec<&dyn Signer> = members.iter().map(|m| m.signer()).collect();
                    admin
                        .mint_to_multisig(&mint, &to, &amount, &multisig, &signers, sender.signer())
                        .await?
                }
                None => {
                    admin
                        .mint_to(&mint, &to, &amount, sender.signer(), sender.signer())
                        .await?
                }
            };
            println!("{}", outcome.signature);
        }
        Command::CreateMultisig { signers, threshold } => {
            let sender = load_wallet(config, Party::Sender)?;
            let multisig = TokenAdmin::new(ledger)
                .create_multisig(sender.signer(), &signers, threshold)
                .await?;
            println!("{}", multisig.address);
        }
        Command::CreateMetadata { mint, fields } => {
            let sender = load_wallet(config, Party::Sender)?;
            let mint = resolve_mint(mint, config)?.context("No mint given or configured")?;
            let record = TokenAdmin::new(ledger)
                .create_metadata(&mint, &fields.into(), sender.signer(), sender.signer())
                .await?;
            println!("{}", record.address);
        }
        Command::UpdateMetadata { mint, fields } => {
            let sender = load_wallet(config, Party::Sender)?;
            let mint = resolve_mint(mint, config)?.context("No mint given or configured")?;
            let outcome = TokenAdmin::new(ledger)
                .update_metadata(&mint, &fields.into(), sender.signer(), sender.signer())
                .await?;
            println!("{}", outcome.signature);
        }
        Command::CreateNonce => {
            let sender = load_wallet(config, Party::Sender)?;
            let handle = NonceManager::new(ledger)
                .create(sender.signer(), &sender.pubkey())
                .await?;
            println!("{}", handle.account);
        }
        Command::AdvanceNonce { nonce } => {
            let sender = load_wallet(config, Party::Sender)?;
            let account = resolve_nonce(nonce, config)?.context("No nonce given or configured")?;
            let manager = NonceManager::new(ledger);
            let handle = manager.fetch(&account).await?;
            let advanced = manager
                .advance(&handle, sender.signer(), sender.signer())
                .await?;
            println!("{}", advanced.token);
        }
        Command::Send { transfer } => {
            let sender = load_wallet(config, Party::Sender)?;
            let intent = transfer.into_intent(sender.pubkey(), config)?;
            let outcome = TokenAdmin::new(ledger)
                .transfer_direct(&intent, sender.signer())
                .await?;
            println!("{}", outcome.signature);
        }
        Command::Prepare {
            transfer,
            fee_payer,
            nonce,
            durable,
        } => {
            let sender = load_wallet(config, Party::Sender)?;
            let intent = transfer.into_intent(sender.pubkey(), config)?;
            let nonce = match (nonce, durable) {
                (Some(account), _) => Some(account),
                (None, true) => Some(
                    config
                        .transfer
                        .nonce_account()?
                        .context("--durable needs transfer.nonce_account in the config")?,
                ),
                (None, false) => None,
            };
            let mode = match nonce {
                Some(account) => AnchorMode::Nonce(NonceManager::new(ledger.clone()).fetch(&account).await?),
                None => AnchorMode::Checkpoint,
            };

            let prepared = SenderSession::new(ledger)
                .prepare(&intent, sender.signer(), &fee_payer, mode)
                .await?;
            println!("{}", serde_json::to_string_pretty(&prepared.summary())?);
        }
        Command::Complete { payload } => {
            let fee_payer = load_wallet(config, Party::FeePayer)?;
            let payload = read_payload(&payload).await?;

            let outcome = FeePayerSession::new(ledger)
                .complete(&payload, fee_payer.signer())
                .await?;
            if outcome.already_finalized {
                info!(signature = %outcome.signature, "transfer was already finalized");
            }
            println!("{}", outcome.signature);
        }
        Command::CloseAccount { mint } => {
            let sender = load_wallet(config, Party::Sender)?;
            let mint = resolve_mint(mint, config)?.context("No mint given or configured")?;
            let outcome = TokenAdmin::new(ledger)
                .close_holding_account(&mint, sender.signer(), sender.signer())
                .await?;
            println!("{}", outcome.signature);
        }
    }
    Ok(())
}

fn load_wallet(config: &Config, party: Party) -> Result<WalletManager> {
    let label = match party {
        Party::Sender => "sender",
        Party::FeePayer => "fee payer",
    };
    let source = config.key_source(party)?;
    WalletManager::from_key_source(source).with_context(|| format!("Failed to load {} wallet", label))
}

impl TransferArgs {
    fn into_intent(self, sender: Pubkey, config: &Config) -> Result<TransferIntent> {
        let mint = if self.native {
            None
        } else {
            resolve_mint(self.mint, config)?
        };
        let intent = match mint {
            Some(mint) => TransferIntent::token(sender, self.to, mint, self.amount),
            None => TransferIntent::native(sender, self.to, self.amount),
        };
        Ok(match self.memo {
            Some(memo) => intent.with_memo(memo),
            None => intent,
        })
    }
}

fn resolve_mint(explicit: Option<Pubkey>, config: &Config) -> Result<Option<Pubkey>> {
    match explicit {
        Some(mint) => Ok(Some(mint)),
        None => config.transfer.mint(),
    }
}

fn resolve_nonce(explicit: Option<Pubkey>, config: &Config) -> Result<Option<Pubkey>> {
    match explicit {
        Some(nonce) => Ok(Some(nonce)),
        None => config.transfer.nonce_account(),
    }
}

async fn read_payload(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read payload file {}", path)),
        None => Ok(arg.to_string()),
    }
}

/// Load the configuration file, falling back to defaults when it is absent
fn load_config(path: &str) -> Config {
    match Config::from_file_with_env(path) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not initialized yet
            eprintln!("Failed to load config from {} ({:#}), using defaults", path, e);
            let mut config = Config::default();
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) {
    let env_filter = if verbose {
        "delegated_transfer=debug,info"
    } else {
        "delegated_transfer=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with(
            (!json).then(|| {
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
            }),
        )
        .init();
}
