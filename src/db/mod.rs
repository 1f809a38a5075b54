mod from_row;
pub mod queries;
mod schema;

pub use from_row::FromRow;
pub use schema::init_db;

use std::collections::HashMap;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::events::Dispatcher;
use crate::idempotency::IdempotencyStore;
use crate::providers::ProviderRegistry;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Priority-ordered event dispatcher; the payment capture handler is
    /// registered here at startup.
    pub dispatcher: Arc<Dispatcher>,
    /// Provider adapters keyed by provider name.
    pub providers: Arc<ProviderRegistry>,
    pub idempotency: IdempotencyStore,
    /// Webhook signing secrets keyed by provider name.
    pub webhook_secrets: Arc<HashMap<String, String>>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
