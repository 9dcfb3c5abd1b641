#![allow(clippy::print_stdout, clippy::print_stderr, clippy::exit)]
#![cfg_attr(test, allow(clippy::panic))]

mod manual_signer;
mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anchor_client::interactive::poller::StatusClient;
use anchor_client::{
    AnchorClientConfig, AnchorError, AnchorHttp, AuthEngine, BrowsingContext, ConfigLayer,
    FileStore, InteractiveEngine, KeyDiscoveryProvider, KeyValueStore, MessageBus, Network,
    PollEvent, SessionCredential, SessionStore, TrackedTransfer, TransactionRecord,
    TransactionStatus, TransferKind, TransferOperation, WalletBackend, WithdrawMethod,
    WithdrawMethodKind,
};
use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

use manual_signer::{MANUAL_BACKEND_ID, ManualSigner};
use terminal::TerminalBrowser;

const DEFAULT_RETURN_URL: &str = "http://localhost/anchor-return";

#[derive(Parser)]
#[command(name = "anchor")]
#[command(about = "Authenticate with a Stellar anchor and run interactive transfers")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// TOML file with home_domain, transfer_server, network, asset_code, ...
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    home_domain: Option<String>,
    #[arg(long, global = true)]
    transfer_server: Option<String>,
    /// `testnet` or `public`.
    #[arg(long, global = true)]
    network: Option<String>,
    #[arg(long, global = true)]
    asset_code: Option<String>,
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    /// Where the wallet selection and session are kept.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Choose the wallet backend and, for the manual signer, its account key.
    SelectWallet {
        #[arg(default_value = MANUAL_BACKEND_ID)]
        id: String,
        #[arg(long)]
        account: Option<String>,
    },
    /// Run challenge/response authentication and store the session.
    Auth,
    /// Start an interactive withdrawal.
    Withdraw(WithdrawArgs),
    /// Start an interactive deposit.
    Deposit(DepositArgs),
    /// Reconcile the URL the anchor redirected back to.
    Resume {
        #[arg(long)]
        url: String,
        /// Used only when the URL carries no `kind` parameter.
        #[arg(long, value_enum, default_value_t = KindArg::Withdrawal)]
        kind: KindArg,
    },
    /// Show a transaction's status, optionally following it to completion.
    Status {
        #[arg(long)]
        id: String,
        #[arg(long)]
        watch: bool,
    },
    /// Forget the wallet and clear the stored session.
    Disconnect,
}

#[derive(Args, Debug)]
struct WithdrawArgs {
    #[arg(long)]
    amount: String,
    /// cash_out, mobile_top_up, bill_payment, wallet_top_up or receipt_payment.
    #[arg(long, value_parser = parse_method)]
    method: WithdrawMethodKind,
    /// Method field as `name=value`; repeatable.
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,
    #[command(flatten)]
    redirect: RedirectArgs,
}

#[derive(Args, Debug)]
struct DepositArgs {
    #[arg(long)]
    amount: String,
    #[command(flatten)]
    redirect: RedirectArgs,
}

#[derive(Args, Debug)]
struct RedirectArgs {
    /// Location the anchor sends the user back to.
    #[arg(long, default_value = DEFAULT_RETURN_URL)]
    return_url: String,
    /// Follow the transaction when the anchor reports its id.
    #[arg(long)]
    track: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Withdrawal,
    Deposit,
}

impl From<KindArg> for TransferKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Withdrawal => TransferKind::Withdrawal,
            KindArg::Deposit => TransferKind::Deposit,
        }
    }
}

fn parse_method(raw: &str) -> Result<WithdrawMethodKind, String> {
    WithdrawMethodKind::from_type_name(raw).ok_or_else(|| {
        let known: Vec<&str> = WithdrawMethodKind::ALL
            .iter()
            .map(|kind| kind.type_name())
            .collect();
        format!("unknown method `{raw}` (expected one of: {})", known.join(", "))
    })
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("field `{raw}` must look like name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("field `{raw}` has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}

struct CliState {
    store: Arc<dyn KeyValueStore>,
    signer: Arc<ManualSigner>,
    provider: Arc<KeyDiscoveryProvider>,
    sessions: SessionStore,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(Cli::parse()).await {
        match error.downcast_ref::<AnchorError>() {
            Some(anchor) => eprintln!("error [{}]: {error:#}", anchor.kind().label()),
            None => eprintln!("error: {error:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let state_path = cli
        .global
        .state_file
        .clone()
        .unwrap_or_else(FileStore::default_path);
    let context = open_context(state_path)?;

    match cli.command {
        Commands::SelectWallet { id, account } => select_wallet(&context, &id, account.as_deref()),
        Commands::Auth => authenticate(&context, &load_config(&cli.global)?).await,
        Commands::Withdraw(args) => {
            let method = WithdrawMethod::build(args.method, |name| {
                args.fields
                    .iter()
                    .rev()
                    .find(|(field, _)| field == name)
                    .map(|(_, value)| value.clone())
            });
            let operation = TransferOperation::Withdraw {
                amount: args.amount,
                method,
            };
            start_transfer(&context, &load_config(&cli.global)?, &operation, &args.redirect).await
        }
        Commands::Deposit(args) => {
            let operation = TransferOperation::Deposit {
                amount: args.amount,
            };
            start_transfer(&context, &load_config(&cli.global)?, &operation, &args.redirect).await
        }
        Commands::Resume { url, kind } => {
            resume(&context, &load_config(&cli.global)?, &url, kind.into()).await
        }
        Commands::Status { id, watch } => {
            status(&context, &load_config(&cli.global)?, &id, watch).await
        }
        Commands::Disconnect => disconnect(&context).await,
    }
}

fn open_context(state_path: PathBuf) -> Result<CliState> {
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create state dir {}", parent.display()))?;
    }
    tracing::debug!(path = %state_path.display(), "opening state file");
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(state_path));
    let signer = Arc::new(ManualSigner::new(store.clone()));
    let provider = Arc::new(KeyDiscoveryProvider::init(
        store.clone(),
        vec![signer.clone() as Arc<dyn WalletBackend>],
        MANUAL_BACKEND_ID,
    )?);
    Ok(CliState {
        sessions: SessionStore::new(store.clone()),
        store,
        signer,
        provider,
    })
}

/// Flags over environment over file; defaults fill the rest.
fn load_config(global: &GlobalArgs) -> Result<AnchorClientConfig> {
    let file = match &global.config {
        Some(path) => ConfigLayer::load_file(path)?,
        None => ConfigLayer::default(),
    };
    let flags = ConfigLayer {
        home_domain: global.home_domain.clone(),
        transfer_server: global.transfer_server.clone(),
        network: global.network.as_deref().map(Network::parse).transpose()?,
        asset_code: global.asset_code.clone(),
        poll_interval_ms: global.poll_interval_ms,
        request_timeout_ms: None,
    };
    let layer = file.overlay(ConfigLayer::from_env()?).overlay(flags);
    let config = AnchorClientConfig::from_layer(layer).context("resolve anchor configuration")?;
    tracing::debug!(
        config_file = ?global.config,
        home_domain = %config.home_domain,
        network = ?config.network,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "anchor configuration resolved"
    );
    Ok(config)
}

fn select_wallet(context: &CliState, id: &str, account: Option<&str>) -> Result<()> {
    let selected = context.provider.select_backend(id)?;
    if let Some(account) = account {
        context.signer.set_account(account)?;
        tracing::info!(backend = %selected, "account key stored");
    }
    println!("wallet backend: {selected}");
    if let Some(account) = context.store.get(manual_signer::MANUAL_ACCOUNT_KEY)? {
        println!("account: {account}");
    }
    Ok(())
}

async fn authenticate(context: &CliState, config: &AnchorClientConfig) -> Result<()> {
    let engine = AuthEngine::new(
        AnchorHttp::new(config.request_timeout),
        config.clone(),
        context.provider.clone(),
        context.sessions.clone(),
    );
    let credential = engine.authenticate().await?;
    println!("authenticated as {}", credential.account_key);
    Ok(())
}

async fn require_session(context: &CliState) -> Result<SessionCredential> {
    context
        .sessions
        .restore(&context.provider)
        .await?
        .ok_or_else(|| anyhow!("no valid session; run `anchor auth` first"))
}

fn interactive_engine(config: &AnchorClientConfig, location: Url) -> InteractiveEngine {
    InteractiveEngine::new(
        AnchorHttp::new(config.request_timeout),
        config.clone(),
        Arc::new(TerminalBrowser::new(location)) as Arc<dyn BrowsingContext>,
        MessageBus::new(),
    )
}

async fn start_transfer(
    context: &CliState,
    config: &AnchorClientConfig,
    operation: &TransferOperation,
    redirect: &RedirectArgs,
) -> Result<()> {
    let credential = require_session(context).await?;
    let location = Url::parse(&redirect.return_url)
        .with_context(|| format!("invalid return url `{}`", redirect.return_url))?;
    let engine = interactive_engine(config, location);

    let transfer = engine.start_redirect(&credential, operation).await?;
    match (&transfer.transaction_id, redirect.track) {
        (Some(id), true) => {
            let record = TransactionRecord::new(id, TransactionStatus::Incomplete, transfer.kind);
            follow(engine.track(&credential, record).await?).await
        }
        (Some(id), false) => {
            println!("transaction id: {id}");
            Ok(())
        }
        (None, _) => {
            println!("after finishing with the anchor, run `anchor resume --url <redirect url>`");
            Ok(())
        }
    }
}

async fn resume(
    context: &CliState,
    config: &AnchorClientConfig,
    url: &str,
    kind: TransferKind,
) -> Result<()> {
    let credential = require_session(context).await?;
    let location = Url::parse(url).with_context(|| format!("invalid url `{url}`"))?;
    let engine = interactive_engine(config, location);
    match engine.reconcile_return(Some(&credential), kind).await? {
        Some(tracked) => follow(tracked).await,
        None => Err(anyhow!("`{url}` carries no transaction id")),
    }
}

async fn status(
    context: &CliState,
    config: &AnchorClientConfig,
    id: &str,
    watch: bool,
) -> Result<()> {
    let credential = require_session(context).await?;
    let engine = interactive_engine(config, Url::parse(DEFAULT_RETURN_URL)?);
    if watch {
        let record =
            TransactionRecord::new(id, TransactionStatus::Incomplete, TransferKind::Withdrawal);
        return follow(engine.track(&credential, record).await?).await;
    }

    let client = StatusClient::new(
        AnchorHttp::new(config.request_timeout),
        &engine.anchor_base().await,
        &credential.bearer_token,
    );
    let update = client
        .fetch(id)
        .await
        .map_err(|error| AnchorError::Transport(error.to_string()))?;
    print_status(id, &update.status, update.message.as_deref());
    Ok(())
}

async fn follow(tracked: TrackedTransfer) -> Result<()> {
    let record = &tracked.record;
    print_status(&record.id, &record.status, record.message.as_deref());
    let Some(mut events) = tracked.events else {
        return Ok(());
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PollEvent::Updated(record)) => {
                    print_status(&record.id, &record.status, record.message.as_deref());
                }
                Some(PollEvent::TransportError(error)) => eprintln!("warning: {error}"),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("stopped following {}", record.id);
                return Ok(());
            }
        }
    }
}

fn print_status(id: &str, status: &TransactionStatus, message: Option<&str>) {
    let marker = if status.is_terminal() { " (final)" } else { "" };
    match message {
        Some(message) => println!("{id}: {status}{marker} - {message}"),
        None => println!("{id}: {status}{marker}"),
    }
}

async fn disconnect(context: &CliState) -> Result<()> {
    context.sessions.clear()?;
    context.provider.forget().await?;
    tracing::info!("session and wallet selection cleared");
    println!("disconnected");
    Ok(())
}
