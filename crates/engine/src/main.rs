use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onramp_engine::{
    create_example_config, ConsoleWidgetFactory, EngineConfig, EngineDeps, HttpPriceSource, ReconciliationEngine,
    StaticWalletProvider, WalletProvider,
};
use onramp_types::PurchaseIntent;

#[derive(Parser, Debug)]
#[command(name = "onramp-engine")]
#[command(about = "Fiat on-ramp reconciliation engine driven from the terminal")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "onramp.toml")]
    config: String,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Wallet address to expose; without it no wallet is present
    #[arg(short, long)]
    address: Option<String>,

    /// Start with the wallet already connected
    #[arg(long, requires = "address")]
    connected: bool,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    write_example_config: Option<String>,
}

const HELP: &str = "commands: connect | disconnect | buy <fiat> | asset <amount> | refresh | event <json> | close | status | quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    if let Some(path) = &args.write_example_config {
        create_example_config(path).with_context(|| format!("writing example config to {}", path))?;
        info!("Example configuration written to {}", path);
        return Ok(());
    }

    let config = EngineConfig::load_or_default(&args.config)?;
    info!(
        "Buying {} with {} via {}",
        config.widget.asset,
        config.widget.fiat_currency,
        config.widget.url()
    );

    let price_source = Arc::new(HttpPriceSource::new(&config.price)?);
    let wallet = args
        .address
        .as_ref()
        .map(|address| Arc::new(StaticWalletProvider::new(address.clone(), args.connected)));
    let widgets = ConsoleWidgetFactory::new();

    let engine = ReconciliationEngine::start(
        &config,
        EngineDeps {
            price_source,
            wallet: wallet.clone().map(|w| w as Arc<dyn WalletProvider>),
            widgets: Arc::new(widgets.clone()),
        },
    );

    let mut updates = engine.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            info!(
                "v{} wallet={:?} rate={} busy={} history={}",
                snapshot.version,
                snapshot.connection.status,
                snapshot
                    .quote
                    .as_ref()
                    .map(|q| format!("{} ({:?})", q.rate.round_dp(4), q.source))
                    .unwrap_or_else(|| "-".to_string()),
                snapshot.purchase_busy,
                snapshot.transaction_count
            );
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match run_command(&engine, &widgets, wallet.as_deref(), line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("error: {:#}", e),
                }
            }
        }
    }

    engine.dispose();
    Ok(())
}

/// Execute one shell command. Returns `false` to stop; errors are reported
/// and the shell keeps running.
async fn run_command(
    engine: &ReconciliationEngine,
    widgets: &ConsoleWidgetFactory,
    wallet: Option<&StaticWalletProvider>,
    line: &str,
) -> Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "connect" => {
            let state = engine.request_connect().await;
            println!("wallet: {:?} {}", state.status, state.address.or(state.last_error).unwrap_or_default());
        }
        "disconnect" => match wallet {
            Some(wallet) => wallet.disconnect(),
            None => println!("no wallet present"),
        },
        "buy" => {
            let fiat = PurchaseIntent::parse_amount(rest)?;
            let intent = engine.set_fiat_amount(fiat)?;
            match engine.request_open_purchase(intent) {
                Ok(session) => println!("session {} open", session),
                Err(_) => println!("{}", engine.snapshot().purchase_error.unwrap_or_default()),
            }
        }
        "asset" => {
            let asset = PurchaseIntent::parse_amount(rest)?;
            let intent = engine.set_asset_amount(asset)?;
            println!("asset {} = fiat {}", intent.asset_amount, intent.fiat_amount);
        }
        "refresh" => match engine.refresh_price_now().await {
            Some(quote) => println!("rate {} ({:?})", quote.rate.round_dp(4), quote.source),
            None => println!("no rate yet"),
        },
        "event" => {
            let raw = serde_json::from_str(rest).context("event must be JSON")?;
            if !widgets.emit(raw) {
                println!("no widget shown");
            }
        }
        "close" => engine.close_purchase(),
        "status" => println!("{}", serde_json::to_string_pretty(&engine.snapshot())?),
        "help" => println!("{}", HELP),
        other => warn!("Unknown command '{}'. {}", other, HELP),
    }

    Ok(true)
}

fn init_tracing(args: &Args) {
    let log_level = match (&args.log_level, args.verbose) {
        (Some(level), _) => level.clone(),
        (None, true) => "debug".to_string(),
        (None, false) => "info".to_string(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("onramp_engine={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
