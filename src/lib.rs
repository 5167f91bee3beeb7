pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use logic::{
    ApplyEngine, ApplyFailure, ApplyReport, ChangeEffects, ChangesetError, EntityRecord,
    FailureCause, RunReport, ValidationError, ValidationErrorType,
};

// Export all model types
pub use model::*;

pub use store::{MemoryStore, PostgresStore, Store};

use axum::Router;
use std::sync::Arc;

use crate::api::handlers::AppContext;
use crate::config::{AppConfig, StorageBackend};

/// Build the application router over `store`
pub fn build_app<S: Store + 'static>(store: Arc<S>, auth_token: Option<String>) -> Router {
    crate::api::routes::create_router().with_state(Arc::new(AppContext::new(store, auth_token)))
}

/// Connect the configured backend and build the router
pub async fn build_app_from_config(config: &AppConfig) -> anyhow::Result<Router> {
    let token = config.auth.api_token.clone();
    match config.storage.backend {
        StorageBackend::Postgres => {
            let store =
                PostgresStore::new(&config.database_url(), config.max_connections()).await?;
            store.migrate().await?;
            Ok(build_app(Arc::new(store), token))
        }
        StorageBackend::Memory => Ok(build_app(Arc::new(MemoryStore::new()), token)),
    }
}
