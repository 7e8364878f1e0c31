use clap::{Parser, Subcommand};
use line_notify::application::janitor::ExpiryJanitor;
use line_notify::application::ledger::OrderLedger;
use line_notify::application::pickup::PickupTracker;
use line_notify::application::reconciler::GatewayReconciler;
use line_notify::application::reminder::ReminderScheduler;
use line_notify::application::scheduler::{PeriodicTask, run_periodic};
use line_notify::config::{Config, StorageArgs};
use line_notify::domain::order::OrderStatus;
use line_notify::domain::ports::{OrderStoreBox, PickupStoreBox, SharedClock, SharedNotifier};
use line_notify::infrastructure::clock::SystemClock;
use line_notify::infrastructure::ecpay::EcPayGateway;
use line_notify::infrastructure::http_client;
use line_notify::infrastructure::inventory::HttpInventorySource;
use line_notify::infrastructure::json_file::{JsonFileOrderStore, JsonFilePickupStore};
use line_notify::infrastructure::line::LinePushNotifier;
use line_notify::infrastructure::linepay::LinePayGateway;
use line_notify::interfaces::csv::order_writer::OrderWriter;
use line_notify::interfaces::http::{AppState, router};
use line_notify::telemetry::{self, LogFormat};
use miette::{IntoDiagnostic, Result};
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service together with the reminder, pickup and expiry loops.
    Serve(Config),
    /// Print orders as CSV on stdout.
    ExportOrders {
        #[command(flatten)]
        storage: StorageArgs,

        /// Only export orders in this status (pending, paid, expired).
        #[arg(long)]
        status: Option<OrderStatus>,
    },
    /// Remove every overdue pending order once and print how many were removed.
    Sweep {
        #[command(flatten)]
        storage: StorageArgs,
    },
}

/// RocksDB when compiled in and `DB_PATH` is given, JSON files otherwise.
fn open_stores(storage: &StorageArgs) -> Result<(OrderStoreBox, PickupStoreBox)> {
    #[cfg(feature = "storage-rocksdb")]
    {
        if let Some(db_path) = &storage.db_path {
            let store = line_notify::infrastructure::rocksdb::RocksDBStore::open(db_path)
                .into_diagnostic()?;
            tracing::info!(path = %db_path.display(), "Using RocksDB storage");
            return Ok((Box::new(store.clone()), Box::new(store)));
        }
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    {
        if let Some(db_path) = &storage.db_path {
            tracing::warn!(
                path = %db_path.display(),
                "DB_PATH ignored: built without the storage-rocksdb feature, falls back to JSON files"
            );
        }
    }

    let orders = JsonFileOrderStore::open(&storage.data_dir).into_diagnostic()?;
    let pickup = JsonFilePickupStore::open(&storage.data_dir).into_diagnostic()?;
    tracing::info!(dir = %storage.data_dir.display(), "Using JSON file storage");
    Ok((Box::new(orders), Box::new(pickup)))
}

fn open_ledger(storage: &StorageArgs) -> Result<(Arc<OrderLedger>, PickupStoreBox)> {
    let (orders, pickup) = open_stores(storage)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let ledger = OrderLedger::new(orders, clock, storage.order_ttl());
    Ok((Arc::new(ledger), pickup))
}

async fn serve(config: Config) -> Result<()> {
    // Refuse to start without an admin target or a feed.
    let pickup_settings = config.pickup_settings().into_diagnostic()?;
    let inventory_endpoint = config.inventory_endpoint().into_diagnostic()?.to_string();

    let (ledger, pickup_store) = open_ledger(&config.storage)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let client = http_client(config.outbound_timeout()).into_diagnostic()?;
    let notifier: SharedNotifier = Arc::new(LinePushNotifier::new(
        client.clone(),
        config.line_api_url.clone(),
        config.line_channel_access_token.clone(),
    ));

    let linepay = config
        .linepay()
        .map(|c| Arc::new(LinePayGateway::new(client.clone(), c)));
    let ecpay = config.ecpay().map(|c| Arc::new(EcPayGateway::new(c)));
    if linepay.is_none() && ecpay.is_none() {
        tracing::warn!("No payment gateway configured; payment requests will be rejected");
    }

    let reconciler = Arc::new(GatewayReconciler::new(
        ledger.clone(),
        notifier.clone(),
        pickup_settings.admin_user_id.clone(),
    ));
    let inventory = Arc::new(HttpInventorySource::new(
        client.clone(),
        inventory_endpoint,
        config.inventory_token.clone(),
    ));
    let tracker = Arc::new(PickupTracker::new(
        inventory,
        pickup_store,
        notifier.clone(),
        clock,
        pickup_settings,
    ));
    let reminder = Arc::new(ReminderScheduler::new(
        ledger.clone(),
        notifier.clone(),
        config.reminder_policy(),
        config.public_base_url.clone(),
    ));
    let janitor = Arc::new(ExpiryJanitor::new(ledger.clone()));

    let shutdown = CancellationToken::new();
    let reminder: Arc<dyn PeriodicTask> = reminder;
    let pickup_task: Arc<dyn PeriodicTask> = tracker.clone();
    let janitor: Arc<dyn PeriodicTask> = janitor;
    let loops = [
        (reminder, config.reminder_period()),
        (pickup_task, config.pickup_poll_period()),
        (janitor, config.janitor_period()),
    ];
    let handles: Vec<_> = loops
        .into_iter()
        .map(|(task, period)| tokio::spawn(run_periodic(task, period, shutdown.clone())))
        .collect();

    let state = AppState {
        ledger,
        reconciler,
        pickup: tracker,
        linepay,
        ecpay,
        reminder_policy: config.reminder_policy(),
        public_base_url: config.public_base_url.clone(),
        linepay_in_flight: Default::default(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(addr = %config.bind_addr, "Listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => tracing::info!("Shutdown requested"),
                _ = signal.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
    served.into_diagnostic()
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn export_orders(storage: StorageArgs, status: Option<OrderStatus>) -> Result<()> {
    let (ledger, _) = open_ledger(&storage)?;
    let orders = match status {
        Some(status) => ledger.list_by_status(status).await,
        None => ledger.list().await,
    }
    .into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = OrderWriter::new(stdout.lock());
    writer
        .write_orders(orders, ledger.now())
        .into_diagnostic()?;
    Ok(())
}

async fn sweep(storage: StorageArgs) -> Result<()> {
    let (ledger, _) = open_ledger(&storage)?;
    let removed = ExpiryJanitor::new(ledger).sweep().await.into_diagnostic()?;
    println!("{removed}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    match cli.command {
        Command::Serve(config) => serve(config).await,
        Command::ExportOrders { storage, status } => export_orders(storage, status).await,
        Command::Sweep { storage } => sweep(storage).await,
    }
}
