// src/main.rs
//! Escrow contract tracker CLI
//!
//! Keeps the list of tracked contract ids and the API key in a local
//! database, watches the contracts against the escrow service, and lets
//! the user mark a contract as paid or cancel it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hodl_contracts::{
    available_actions, metrics, ActionOutcome, ApiCredential, ApiError, AppConfig,
    ConfirmationPrompt, Contract, ContractAction, ContractId, ContractStore, ContractsSession,
    CredentialProvider, EscrowApi, HodlHodlClient, PromptRequest, StaticCredential, SyncState,
    WalletDatabase,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, value_parser, default_value = "hodl-contracts.toml")]
    config: PathBuf,

    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the escrow service API key
    SetKey { key: String },
    /// Start tracking a contract id
    Add { id: String },
    /// Stop tracking a contract id
    Remove { id: String },
    /// List tracked contract ids
    List,
    /// Keep contracts in sync and print every update
    Watch {
        #[clap(long)]
        metrics_port: Option<u16>,
    },
    /// Show one contract in detail
    Show { id: String },
    /// Mark a contract as paid (buyer, in progress)
    Pay {
        id: String,
        #[clap(short, long)]
        yes: bool,
    },
    /// Cancel a contract
    Cancel {
        id: String,
        #[clap(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = AppConfig::load(&args.config).context("Failed to load configuration")?;

    let db = WalletDatabase::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    match args.command {
        Command::SetKey { key } => {
            db.set_api_key(&key).await?;
            println!("API key saved");
        }
        Command::Add { id } => {
            db.add_contract_id(&ContractId::new(id)).await?;
        }
        Command::Remove { id } => {
            db.remove_contract_id(&ContractId::new(id)).await?;
        }
        Command::List => {
            for tracked in db.tracked_contracts().await? {
                let added = chrono::DateTime::<chrono::Utc>::from_timestamp(tracked.added_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!("{}  (added {})", tracked.contract_id, added);
            }
        }
        Command::Watch { metrics_port } => watch(&config, db, metrics_port).await?,
        Command::Show { id } => {
            let mut session = mount(&config, db).await?;
            let result = select(&mut session, &id).map(|c| print_contract(c, &config));
            session.teardown().await;
            result?;
        }
        Command::Pay { id, yes } => {
            run_action(&config, db, &id, ContractAction::MarkAsPaid, yes).await?
        }
        Command::Cancel { id, yes } => {
            run_action(&config, db, &id, ContractAction::Cancel, yes).await?
        }
    }

    Ok(())
}

async fn mount(config: &AppConfig, db: WalletDatabase) -> Result<ContractsSession> {
    let credentials: Box<dyn CredentialProvider> = match &config.api.api_key {
        Some(key) => Box::new(StaticCredential(key.clone())),
        None => Box::new(db.clone()),
    };

    let base_url = config.api.base_url.clone();
    let timeout = config.request_timeout();
    let connect = move |credential: &ApiCredential| -> Result<Arc<dyn EscrowApi>, ApiError> {
        Ok(Arc::new(HodlHodlClient::new(&base_url, credential, timeout)?))
    };

    info!("Connecting to escrow service at {}", config.api.base_url);

    let session = ContractsSession::mount(
        credentials.as_ref(),
        Arc::new(db),
        connect,
        config.session_options(),
    )
    .await
    .context("Failed to open contracts session")?;

    Ok(session)
}

fn select<'a>(session: &'a mut ContractsSession, id: &str) -> Result<&'a Contract> {
    session.select(&ContractId::from(id)).with_context(|| {
        format!(
            "Contract {} is not in progress (canceled, unknown, or failed to load)",
            id
        )
    })
}

async fn watch(config: &AppConfig, db: WalletDatabase, metrics_port: Option<u16>) -> Result<()> {
    let metrics_handle = metrics_port.map(|port| {
        tokio::spawn(async move {
            if let Err(e) = metrics::start_server(port).await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    let session = mount(config, db).await?;
    print_contracts(&session.state(), config);

    let updates = futures::stream::unfold(session.subscribe(), |mut rx| async move {
        rx.changed().await.ok()?;
        let state = rx.borrow_and_update().clone();
        Some((state, rx))
    })
    .filter(|state| futures::future::ready(!state.is_loading));
    futures::pin_mut!(updates);

    info!("Watching contracts, press Ctrl-C to stop");

    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(state) => print_contracts(&state, config),
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    session.teardown().await;
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    Ok(())
}

async fn run_action(
    config: &AppConfig,
    db: WalletDatabase,
    id: &str,
    action: ContractAction,
    assume_yes: bool,
) -> Result<()> {
    let mut session = mount(config, db).await?;

    let result = async {
        print_contract(select(&mut session, id)?, config);

        let outcome = if assume_yes {
            session.perform(action, &AutoConfirm).await
        } else {
            session.perform(action, &StdinPrompt).await
        }?;

        match outcome {
            ActionOutcome::Declined => println!("Nothing sent"),
            ActionOutcome::Completed { .. } => {
                println!("Done: {} accepted for contract {}", action, id);
                print_contracts(&session.state(), config);
            }
        }

        Ok::<_, anyhow::Error>(())
    }
    .await;

    session.teardown().await;
    result
}

fn print_contracts(state: &SyncState, config: &AppConfig) {
    if state.contracts.is_empty() {
        println!("You dont have any contracts in progress");
    }

    for contract in &state.contracts {
        println!("[{}] {}", contract.id, contract.summary());
        println!("    {}", contract.funding_message());
    }

    for failure in &state.failures {
        println!("[{}] failed to load: {}", failure.contract_id, failure.reason);
    }

    if let Some(at) = state.last_synced_at {
        println!("-- synced {} from {}", at.to_rfc3339(), config.api.base_url);
    }
}

fn print_contract(contract: &Contract, config: &AppConfig) {
    println!("Contract {}: {}", contract.id, contract.summary());
    println!(
        "Price: {} {} per {}",
        contract.price, contract.currency_code, contract.asset_code
    );

    if let Some(amount) = contract.volume_breakdown.as_ref().and_then(|b| b.goes_to_buyer) {
        println!("You will get: {} {}", amount, contract.asset_code);
    }
    if let Some(address) = &contract.release_address {
        println!("To: {}", address);
    }
    if let Some(url) = contract.escrow_explorer_url() {
        println!("Escrow: {} ({})", contract.escrow_address().unwrap_or_default(), url);
    }
    println!("Escrow state: {}", contract.escrow_state());

    if let Some(details) = contract
        .payment_method_instruction
        .as_ref()
        .and_then(|p| p.details.as_deref())
    {
        println!("How to pay seller:\n{}", details);
    }

    let actions: Vec<String> = available_actions(contract)
        .iter()
        .map(|a| a.to_string())
        .collect();
    if !actions.is_empty() {
        println!("Available actions: {}", actions.join(", "));
    }

    if let Some(url) = contract.offer_url(&config.api.base_url) {
        println!("Offer: {}", url);
    }
}

/// Asks on the terminal
struct StdinPrompt;

#[async_trait]
impl ConfirmationPrompt for StdinPrompt {
    async fn confirm(&self, request: &PromptRequest) -> bool {
        println!("{}", request.title);
        if !request.message.is_empty() {
            println!("{}", request.message);
        }
        print!("[y] {} / [N] {}: ", request.confirm_label, request.decline_label);
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// `--yes` on the command line
struct AutoConfirm;

#[async_trait]
impl ConfirmationPrompt for AutoConfirm {
    async fn confirm(&self, _request: &PromptRequest) -> bool {
        true
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hodl_contracts={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
