#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]
#![expect(
    clippy::cargo_common_metadata,
    reason = "no public repository or homepage is published for this crate yet"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use secrecy::ExposeSecret as _;
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::prelude::*;

mod audit;
mod blob;
mod cli_output;
mod config;
mod custody;
mod db;
mod errors;
mod fsutil;
mod lifecycle;
mod paths;
mod store;
mod wallet;

#[cfg(test)]
mod testutil;

use crate::{
    config::{KeysplitConfig, RootKeySource},
    custody::{
        cipher::{EnvKeyProvider, KeyProvider, MachineKeyProvider, ShareCipher},
        dual_store::DualStore,
        hasher::Sha256Hasher,
        CustodyService, REVEAL_LOG_TARGET,
    },
    lifecycle::WalletLifecycleManager,
    paths::KeysplitPaths,
};

const ROOT_KEY_ENV: &str = "KEYSPLIT_ROOT_KEY_HEX";

#[derive(Parser, Debug)]
#[command(name = "keysplit", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure the user has an active custodial wallet on `network` and print its address.
    ///
    /// Running it again for the same user and network returns the existing wallet.
    Provision {
        #[arg(long)]
        user: String,
        #[arg(long)]
        network: String,
    },

    /// Rebuild and print a wallet's private key.
    ///
    /// Any verification failure prints one generic message and exits non-zero.
    Reveal {
        #[arg(long)]
        user: String,
        #[arg(long, required_unless_present = "wallet_id", conflicts_with = "wallet_id")]
        address: Option<String>,
        #[arg(long)]
        wallet_id: Option<String>,
    },

    /// List a user's wallets (metadata only).
    List {
        #[arg(long)]
        user: String,
    },

    /// Check a wallet's stored share against its recorded content hash without decrypting it.
    Verify {
        #[arg(long)]
        user: String,
        #[arg(long)]
        address: String,
    },

    /// Print resolved paths (useful for debugging).
    Paths,
}

fn init_logging(
    paths: &KeysplitPaths,
) -> eyre::Result<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    // Reveal failure detail goes to the log file only; stderr carries the opaque message.
    let quiet_reveal: tracing_subscriber::filter::Directive = format!("{REVEAL_LOG_TARGET}=off")
        .parse()
        .context("parse reveal log directive")?;
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("keysplit.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone().add_directive(quiet_reveal));
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn build_manager(
    paths: &KeysplitPaths,
    cfg: &KeysplitConfig,
) -> eyre::Result<WalletLifecycleManager> {
    let keys: Arc<dyn KeyProvider> = match cfg.custody.root_key_source {
        RootKeySource::Machine => {
            let p = MachineKeyProvider::new(paths.root_key_path());
            p.ensure().context("initialize root key")?;
            Arc::new(p)
        }
        RootKeySource::Env => Arc::new(EnvKeyProvider::new(ROOT_KEY_ENV)),
    };

    let db = db::Db::open(&paths.data_dir.join(&cfg.storage.db_file))
        .await
        .context("open wallet db")?;
    let blobs = blob::FsBlobStore::open(paths.data_dir.join(&cfg.storage.blob_dir))
        .context("open blob store")?;

    let custody = CustodyService::new(
        DualStore::new(Arc::new(db), Arc::new(blobs)),
        ShareCipher::new(keys),
        Arc::new(Sha256Hasher),
    )
    .with_nonce_bytes(cfg.custody.effective_nonce_bytes());

    Ok(WalletLifecycleManager::new(
        custody,
        Arc::new(wallet::EvmKeyGenerator),
        cfg.custody.clone(),
    )
    .with_audit(audit::AuditLog::new(paths.audit_log_path())))
}

async fn open_manager(paths: &KeysplitPaths) -> eyre::Result<WalletLifecycleManager> {
    let cfg = store::ConfigStore::new(paths).load_or_init_default()?;
    build_manager(paths, &cfg).await
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = KeysplitPaths::discover()?;
    paths.ensure_private_dirs().context("create keysplit dirs")?;
    let _log_guard = init_logging(&paths)?;

    match cli.cmd {
        Command::Provision { user, network } => {
            let mgr = open_manager(&paths).await?;
            let resp = mgr.provision_wallet(&user, &network).await;
            cli_output::print_json(&resp)?;
            Ok(if resp.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Reveal {
            user,
            address,
            wallet_id,
        } => {
            let mgr = open_manager(&paths).await?;
            let revealed = match (wallet_id, address) {
                (Some(id), _) => mgr.reveal_private_key_by_id(&id, &user).await,
                (None, Some(addr)) => mgr.reveal_private_key(&addr, &user).await,
                (None, None) => eyre::bail!("--address or --wallet-id is required"),
            };
            match revealed {
                Ok(secret) => {
                    cli_output::print_json(&serde_json::json!({
                        "private_key": secret.expose_secret(),
                    }))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    cli_output::stderr_writeln(&e.to_string());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::List { user } => {
            let mgr = open_manager(&paths).await?;
            let wallets = mgr.list_wallets(&user).await.context("list wallets")?;
            cli_output::print_json(&wallets)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { user, address } => {
            let mgr = open_manager(&paths).await?;
            let ok = mgr
                .verify_wallet(&address, &user)
                .await
                .context("verify wallet")?;
            cli_output::print_json(&serde_json::json!({ "ok": ok }))?;
            Ok(if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Paths => {
            cli_output::print_json(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
