//! Backend selection by connection string scheme.

use std::sync::Arc;
use tracing::info;
use unibase_core::{Backend, Config, Database, QueryCache, Result, Scheme};
use unibase_document::{DocumentBackend, MemoryDocumentStore};
use unibase_sqlite::SqliteBackend;

/// Opens the backend named by `config.database_string`.
///
/// The count cache is built from the configuration and handed to the
/// backend. An unknown scheme is a validation error.
pub fn open_backend(config: &Config) -> Result<Arc<dyn Backend>> {
    let cache = Arc::new(QueryCache::from_config(config));
    let scheme = config.scheme()?;
    let backend: Arc<dyn Backend> = match scheme {
        Scheme::Sqlite => Arc::new(SqliteBackend::open(config.database_location(), cache)?),
        Scheme::Memory => Arc::new(DocumentBackend::new(
            Arc::new(MemoryDocumentStore::new()),
            cache,
        )),
        Scheme::MongoDb => mongo(config, cache)?,
    };
    info!(?scheme, backend = %backend.kind(), "backend selected");
    Ok(backend)
}

/// Opens a [`Database`] for `config`.
pub fn open(config: Config) -> Result<Database> {
    let backend = open_backend(&config)?;
    Database::new(backend, config)
}

#[cfg(feature = "mongodb")]
fn mongo(config: &Config, cache: Arc<QueryCache>) -> Result<Arc<dyn Backend>> {
    use unibase_document::MongoStore;

    let store = MongoStore::connect(&config.database_string, &config.app_name)
        .map_err(|e| unibase_core::Error::backend(format!("error connecting to mongodb: {e}"), e))?;
    Ok(Arc::new(DocumentBackend::new(Arc::new(store), cache)))
}

#[cfg(not(feature = "mongodb"))]
fn mongo(config: &Config, _cache: Arc<QueryCache>) -> Result<Arc<dyn Backend>> {
    Err(unibase_core::Error::server(format!(
        "{} needs unibase built with the `mongodb` feature",
        config.database_string
    )))
}
