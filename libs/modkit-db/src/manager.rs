use std::sync::Arc;

use dashmap::DashMap;
use sea_orm::{Database, DatabaseConnection};

use crate::handle::DbHandle;

/// Resolves per-module [`DbHandle`]s from a single shared connection pool.
///
/// The engine runs one logical database per deployment (the `database`
/// section of the specification document); `DbManager` hands each module a
/// handle scoped by name so migrations and queries can be attributed to
/// their owning module in logs without every module needing its own pool.
pub struct DbManager {
    connection: DatabaseConnection,
    handles: DashMap<String, Arc<DbHandle>>,
}

impl DbManager {
    /// Connect to `url` and build a manager ready to hand out module-scoped
    /// handles from the resulting pool.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let connection = Database::connect(url).await?;
        Ok(Self {
            connection,
            handles: DashMap::new(),
        })
    }

    /// Resolve (and cache) the handle for `module_name`.
    ///
    /// # Errors
    /// Currently infallible beyond the initial connect, but returns a
    /// `Result` so routing per-module databases in the future doesn't
    /// change this signature.
    pub async fn get(&self, module_name: &str) -> anyhow::Result<Option<Arc<DbHandle>>> {
        if let Some(handle) = self.handles.get(module_name) {
            return Ok(Some(handle.clone()));
        }
        let handle = Arc::new(DbHandle::new(module_name, self.connection.clone()));
        self.handles.insert(module_name.to_owned(), handle.clone());
        Ok(Some(handle))
    }
}
