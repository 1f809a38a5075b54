use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;

use subgate::capture::{PaymentCaptureHandler, PaymentFailedHandler};
use subgate::config::Config;
use subgate::db::{create_pool, init_db, queries, AppState};
use subgate::events::Dispatcher;
use subgate::handlers;
use subgate::idempotency::IdempotencyStore;
use subgate::models::BillingPeriod;
use subgate::providers::ProviderRegistry;

#[derive(Parser, Debug)]
#[command(name = "subgate")]
#[command(about = "Subscription checkout and payment capture service")]
struct Cli {
    /// Seed the database with a dev catalog (categories, plans, bundles, add-ons)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with a dev catalog for manual testing.
/// Only runs in dev mode and when the catalog is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))
        .expect("Failed to count plans");
    if count > 0 {
        tracing::info!("Catalog already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV CATALOG");
    tracing::info!("============================================");

    let base = queries::create_category(&conn, "Base Plan", true)
        .expect("Failed to create base category");
    let extras = queries::create_category(&conn, "Extras", false)
        .expect("Failed to create extras category");

    let free = queries::create_plan(&conn, "Free", 0, "USD", BillingPeriod::Monthly, true)
        .expect("Failed to create free plan");
    let pro = queries::create_plan(&conn, "Pro", 2900, "USD", BillingPeriod::Monthly, true)
        .expect("Failed to create pro plan");
    let pro_yearly =
        queries::create_plan(&conn, "Pro Yearly", 29900, "USD", BillingPeriod::Yearly, true)
            .expect("Failed to create yearly plan");

    for plan in [&free, &pro, &pro_yearly] {
        queries::link_plan_category(&conn, &plan.id, &base.id)
            .expect("Failed to link plan to category");
    }

    let bundle = queries::create_token_bundle(&conn, "1000 Tokens", 1000, 1000, "USD")
        .expect("Failed to create token bundle");
    let addon = queries::create_add_on(&conn, "Priority Support", 500, "USD")
        .expect("Failed to create add-on");

    tracing::info!("Category: {} ({})", base.name, base.id);
    tracing::info!("Category: {} ({})", extras.name, extras.id);
    tracing::info!("Plan: {} ({}) - {} cents", free.name, free.id, free.price_cents);
    tracing::info!("Plan: {} ({}) - {} cents", pro.name, pro.id, pro.price_cents);
    tracing::info!(
        "Plan: {} ({}) - {} cents",
        pro_yearly.name,
        pro_yearly.id,
        pro_yearly.price_cents
    );
    tracing::info!("Bundle: {} ({})", bundle.name, bundle.id);
    tracing::info!("Add-on: {} ({})", addon.name, addon.id);

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  free_plan_id: {}", free.id);
    println!("  pro_plan_id: {}", pro.id);
    println!("  bundle_id: {}", bundle.id);
    println!("  addon_id: {}", addon.id);
    println!("--- END COPY ---");
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let idempotency = IdempotencyStore::new(db_pool.clone());

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register(Arc::new(PaymentCaptureHandler::new(
        db_pool.clone(),
        idempotency.clone(),
    )));
    dispatcher.register(Arc::new(PaymentFailedHandler::new(db_pool.clone())));

    let state = AppState {
        db: db_pool,
        dispatcher,
        providers: Arc::new(ProviderRegistry::with_defaults()),
        idempotency: idempotency.clone(),
        webhook_secrets: Arc::new(config.webhook_secrets.clone()),
    };

    // Purge expired idempotency rows on startup
    match idempotency.purge_expired() {
        Ok(count) if count > 0 => {
            tracing::info!("Purged {} expired idempotency keys", count);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to purge expired idempotency keys: {}", e);
        }
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set SUBGATE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Subgate server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
