//! walletd
//!
//! The standalone dev host for the wallet core: serves `/ws/dapp` and
//! `/ws/ui` over a local axum listener, so the port router and UI bridge
//! can be exercised without a real browser extension harness.
//!
//! Run modes:
//!   walletd serve [--bind <addr>] [--config <path>]   Start the dev host
//!   walletd config                                    Print resolved config

use std::sync::Arc;

use clap::{Parser, Subcommand};

use walletd_core::api::server::{build_router, AppState};
use walletd_core::config::WalletConfig;
use walletd_core::controllers::{
    AccountsController, ApprovalsController, ChainRegistryController, NetworkController,
    PermissionsController, TransactionsController,
};
use walletd_core::keyring::KeyringService;
use walletd_core::logging;
use walletd_core::messenger::Messenger;
use walletd_core::port_router::PortRouter;
use walletd_core::rpc::eip155_namespace::{self, Eip155Services};
use walletd_core::rpc::transaction_adapter::{Eip155TransactionAdapter, TransactionAdapter};
use walletd_core::rpc::RpcEngine;
use walletd_core::session::UnlockSession;
use walletd_core::storage::{SqliteStore, StoragePort};
use walletd_core::types::TransactionStatus;
use walletd_core::ui_bridge::UiBridge;
use walletd_core::Vault;

#[derive(Parser)]
#[command(name = "walletd", about = "Background core for a multi-chain wallet browser extension")]
struct Cli {
    /// Overlay TOML config file, applied on top of WALLET_* env vars.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the dev WebSocket host.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the resolved configuration and exit.
    Config,
}

fn load_config(cli: &Cli) -> Result<WalletConfig, Box<dyn std::error::Error>> {
    let mut config = WalletConfig::from_env()?;
    if let Some(path) = &cli.config {
        config = config.apply_overlay_file(path)?;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Config => config.print_summary(),
        Command::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Err(err) = serve(config).await {
                eprintln!("walletd exited: {}", err);
                std::process::exit(1);
            }
        }
    }
}

async fn serve(config: WalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing(&config)?;

    let storage: Arc<dyn StoragePort> = Arc::new(SqliteStore::new(&config.storage_path)?);
    let messenger = Messenger::default();

    let vault = Arc::new(Vault::new(config.pbkdf2_iterations));
    let keyring = Arc::new(KeyringService::new(vault.clone(), storage.clone()));
    let session = Arc::new(UnlockSession::new(config.auto_lock_timeout_ms));
    let accounts = Arc::new(AccountsController::new(messenger.clone()));
    let permissions = Arc::new(PermissionsController::new(storage.clone(), messenger.clone()));
    let approvals = Arc::new(ApprovalsController::new(storage.clone(), messenger.clone()));
    let chains = Arc::new(ChainRegistryController::new(storage.clone(), messenger.clone()));
    let network = Arc::new(NetworkController::new(storage.clone(), messenger.clone()));
    let transactions = Arc::new(TransactionsController::new(
        storage.clone(),
        messenger.clone(),
        config.receipt_poll,
    ));

    chains.load().await?;
    permissions.load().await?;

    let http = reqwest::Client::new();
    resume_transactions(&transactions, &keyring, &network, &http).await;

    let mut rpc_engine = RpcEngine::new(session.clone(), permissions.clone(), approvals.clone(), chains.clone());
    rpc_engine.register_namespace(eip155_namespace::build(Eip155Services {
        keyring: keyring.clone(),
        accounts: accounts.clone(),
        permissions: permissions.clone(),
        approvals: approvals.clone(),
        chains: chains.clone(),
        network: network.clone(),
        transactions: transactions.clone(),
        http: http.clone(),
        active_chain_id: "1".to_string(),
    }));
    let rpc_engine = Arc::new(rpc_engine);

    let router = Arc::new(PortRouter::new(
        rpc_engine,
        session.clone(),
        permissions.clone(),
        accounts.clone(),
        approvals.clone(),
        messenger.clone(),
    ));

    let ui_bridge = Arc::new(UiBridge::new(
        vault,
        keyring,
        session,
        accounts,
        permissions,
        approvals,
        chains,
        network,
        transactions,
        messenger,
    ));

    let state = AppState::new(router, ui_bridge);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "walletd listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Pick up every non-terminal transaction left over from a previous run.
/// `Broadcast` records already have a node-accepted hash, so polling for
/// their receipt resumes exactly where it left off; anything earlier in
/// the pipeline (`Pending`/`Approved`/`Signed`) was interrupted before a
/// hash existed and can't be resumed, so it's marked failed.
async fn resume_transactions(
    transactions: &Arc<TransactionsController>,
    keyring: &Arc<KeyringService>,
    network: &Arc<NetworkController>,
    http: &reqwest::Client,
) {
    let resumed = match transactions.resume_pending().await {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!(error = %err.to_string(), "failed to load pending transactions");
            return;
        }
    };
    if resumed.is_empty() {
        return;
    }

    let adapter: Arc<dyn TransactionAdapter> =
        Arc::new(Eip155TransactionAdapter::new(keyring.clone(), network.clone(), http.clone()));

    for record in resumed {
        match (record.status, record.hash.clone()) {
            (TransactionStatus::Broadcast, Some(hash)) => {
                tracing::info!(id = %record.id, hash = %hash, "resuming receipt poll for broadcast transaction");
                eip155_namespace::spawn_receipt_poll(adapter.clone(), transactions.clone(), record.chain_ref, record.id, hash);
            }
            (status, _) => {
                tracing::warn!(id = %record.id, status = %status.to_string(), "transaction interrupted before broadcast, marking failed");
                transactions.mark_failed(record.id, "interrupted before broadcast".to_string()).await.ok();
            }
        }
    }
}
