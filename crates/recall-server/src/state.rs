//! Application state and the per-account service registry.
//!
//! Each account has its own [`SyncService`] (and its own SQLite file). The
//! [`AccountRegistry`] opens services lazily on first use and keeps them in a
//! `DashMap`, each behind an `Arc<tokio::sync::Mutex<>>` so a sync round
//! holds its account for the whole round without blocking the runtime.
//! `tokio::sync::Mutex` is needed because `rusqlite::Connection` is `!Sync`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use dashmap::DashMap;

use crate::error::ApiError;
use crate::service::SyncService;

/// Header naming the account a request belongs to.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Account used when a request carries no account header.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Where account databases live.
#[derive(Debug, Clone)]
enum StoreLocation {
    /// One `<account>.db` file per account in this directory.
    Directory(PathBuf),
    InMemory,
}

/// Lazily opened sync services, one per account.
pub struct AccountRegistry {
    location: StoreLocation,
    services: DashMap<String, Arc<tokio::sync::Mutex<SyncService>>>,
}

impl AccountRegistry {
    fn new(location: StoreLocation) -> Self {
        AccountRegistry {
            location,
            services: DashMap::new(),
        }
    }

    /// Returns the service for `account`, opening it if needed.
    pub fn get_or_open(
        &self,
        account: &str,
    ) -> Result<Arc<tokio::sync::Mutex<SyncService>>, ApiError> {
        if let Some(service) = self.services.get(account) {
            return Ok(service.clone());
        }
        let service = match &self.location {
            StoreLocation::Directory(dir) => {
                let path = dir.join(format!("{account}.db"));
                let path = path.to_str().ok_or_else(|| {
                    ApiError::InternalError(format!("non UTF-8 database path for '{account}'"))
                })?;
                SyncService::open(path)?
            }
            StoreLocation::InMemory => SyncService::in_memory()?,
        };
        tracing::debug!(account, "opened account");
        let entry = self
            .services
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(service)));
        Ok(entry.clone())
    }

    /// Number of accounts opened since startup.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Extracts and validates the account id of a request.
///
/// Account ids name files on disk, so only ASCII letters, digits, `-` and
/// `_` are accepted.
pub fn account_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(value) = headers.get(ACCOUNT_HEADER) else {
        return Ok(DEFAULT_ACCOUNT.to_string());
    };
    let account = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("account id is not valid ASCII".to_string()))?;
    let valid = !account.is_empty()
        && account.len() <= 64
        && account
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::BadRequest(format!("invalid account id '{account}'")));
    }
    Ok(account.to_string())
}

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountRegistry>,
}

impl AppState {
    /// Creates an `AppState` storing account databases under `db_dir`,
    /// creating the directory if needed.
    pub fn new(db_dir: &str) -> Result<Self, ApiError> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| ApiError::InternalError(format!("cannot create '{db_dir}': {e}")))?;
        Ok(AppState {
            accounts: Arc::new(AccountRegistry::new(StoreLocation::Directory(
                PathBuf::from(db_dir),
            ))),
        })
    }

    /// Creates an `AppState` whose accounts live in memory (for testing).
    pub fn in_memory() -> Self {
        AppState {
            accounts: Arc::new(AccountRegistry::new(StoreLocation::InMemory)),
        }
    }
}
