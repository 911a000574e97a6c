use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use uuid::Uuid;

use crate::api::{self, AppState};
use crate::application::{LedgerConfig, LedgerService, OpContext};
use crate::domain::{Cents, WalletId, format_cents, parse_cents, parse_wallet_id};
use crate::logging::{LogFormat, init_logging};
use crate::storage::{PgWalletStore, SqliteWalletStore, WalletStore};

/// Wallet Ledger - strictly serialized wallet balances
#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "Wallet balance service with per-wallet serialized deposits and withdrawals")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Default deadline for a single ledger operation, in milliseconds
    #[arg(long, env = "OP_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    pub op_timeout_ms: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Store connection parameters. `DATABASE_URL` wins over the individual
/// `DB_*` settings; a `sqlite:` URL selects the SQLite backend.
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Full database URL (postgres://... or sqlite:...)
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_HOST", default_value = "localhost", global = true)]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432, global = true)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "postgres", global = true)]
    pub db_user: String,

    #[arg(long, env = "DB_PASS", default_value = "", hide_env_values = true, global = true)]
    pub db_pass: String,

    #[arg(long, env = "DB_NAME", default_value = "wallets", global = true)]
    pub db_name: String,

    /// TLS mode: disable, allow, prefer, require, verify-ca, verify-full
    #[arg(long, env = "DB_SSLMODE", default_value = "disable", global = true)]
    pub db_sslmode: String,

    /// Connection pool size; bounds the number of in-flight ledger operations
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 20, global = true)]
    pub db_max_connections: u32,
}

/// Which backend to open, resolved from [`StoreArgs`].
#[derive(Debug)]
pub enum StoreTarget {
    Sqlite(String),
    Postgres(PgConnectOptions),
}

impl StoreArgs {
    pub fn target(&self) -> Result<StoreTarget> {
        if let Some(url) = &self.database_url {
            if url.starts_with("sqlite:") {
                return Ok(StoreTarget::Sqlite(url.clone()));
            }
            let options = PgConnectOptions::from_str(url).context("Invalid DATABASE_URL")?;
            return Ok(StoreTarget::Postgres(options));
        }

        let ssl_mode = PgSslMode::from_str(&self.db_sslmode)
            .with_context(|| format!("Invalid DB_SSLMODE '{}'", self.db_sslmode))?;

        let options = PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_user)
            .password(&self.db_pass)
            .database(&self.db_name)
            .ssl_mode(ssl_mode);
        Ok(StoreTarget::Postgres(options))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the wallets table if it does not exist
    Init,

    /// Serve the HTTP API
    Serve {
        /// Listening port
        #[arg(short, long, env = "PORT", default_value_t = 8000)]
        port: u16,
    },

    /// Create a wallet with an opening balance
    Create {
        /// Opening balance (e.g., "100.00")
        #[arg(default_value = "0.00")]
        amount: String,

        /// Wallet ID (a new one is generated if omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Deposit into a wallet, creating it if needed
    Deposit {
        /// Wallet ID
        wallet: String,

        /// Amount (e.g., "25.00")
        amount: String,
    },

    /// Withdraw from a wallet
    Withdraw {
        /// Wallet ID
        wallet: String,

        /// Amount (e.g., "25.00")
        amount: String,
    },

    /// Show the balance of a wallet
    Balance {
        /// Wallet ID
        wallet: String,
    },
}

impl Commands {
    fn needs_schema(&self) -> bool {
        matches!(self, Commands::Init | Commands::Serve { .. })
    }
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.verbose {
            "wallet_ledger=debug,tower_http=debug,sqlx=warn"
        } else {
            "wallet_ledger=info,tower_http=info,sqlx=warn"
        }
    }

    pub async fn run(self) -> Result<()> {
        init_logging(self.log_level(), self.log_format)?;

        let config = LedgerConfig {
            op_timeout: Duration::from_millis(self.op_timeout_ms),
        };
        let max_connections = self.store.db_max_connections;
        let migrate = self.command.needs_schema();

        match self.store.target()? {
            StoreTarget::Sqlite(url) => {
                let store = SqliteWalletStore::connect(&url, max_connections).await?;
                if migrate {
                    store.migrate().await?;
                }
                let result =
                    run_command(self.command, LedgerService::with_config(store.clone(), config))
                        .await;
                store.close().await;
                result
            }
            StoreTarget::Postgres(options) => {
                let store = PgWalletStore::connect_with(options, max_connections).await?;
                if migrate {
                    store.migrate().await?;
                }
                let result =
                    run_command(self.command, LedgerService::with_config(store.clone(), config))
                        .await;
                store.close().await;
                result
            }
        }
    }
}

async fn run_command<S: WalletStore + 'static>(
    command: Commands,
    service: LedgerService<S>,
) -> Result<()> {
    let ctx = OpContext::background();

    match command {
        Commands::Init => {
            println!("Database initialized");
        }

        Commands::Serve { port } => {
            api::serve(AppState::new(service), port).await?;
        }

        Commands::Create { amount, id } => {
            let id = match id {
                Some(id) => parse_id(&id)?,
                None => Uuid::new_v4(),
            };
            let amount_cents = parse_amount(&amount)?;
            let wallet = service.create_wallet(&ctx, id, amount_cents).await?;
            println!(
                "Created wallet {} with balance {}",
                wallet.id,
                format_cents(wallet.balance)
            );
        }

        Commands::Deposit { wallet, amount } => {
            let id = parse_id(&wallet)?;
            let amount_cents = parse_amount(&amount)?;
            let result = service.deposit_or_create(&ctx, id, amount_cents).await?;
            if result.created {
                println!("Created wallet {}", result.wallet.id);
            }
            println!(
                "Deposited {} -> balance {}",
                format_cents(amount_cents),
                format_cents(result.wallet.balance)
            );
        }

        Commands::Withdraw { wallet, amount } => {
            let id = parse_id(&wallet)?;
            let amount_cents = parse_amount(&amount)?;
            let wallet = service.withdraw(&ctx, id, amount_cents).await?;
            println!(
                "Withdrew {} -> balance {}",
                format_cents(amount_cents),
                format_cents(wallet.balance)
            );
        }

        Commands::Balance { wallet } => {
            let id = parse_id(&wallet)?;
            let balance = service.get_balance(&ctx, id).await?;
            println!("{}: {}", id, format_cents(balance));
        }
    }
    Ok(())
}

fn parse_id(input: &str) -> Result<WalletId> {
    parse_wallet_id(input).with_context(|| format!("Invalid wallet ID '{}'", input))
}

fn parse_amount(input: &str) -> Result<Cents> {
    parse_cents(input).context("Invalid amount format. Use '50.00'")
}
