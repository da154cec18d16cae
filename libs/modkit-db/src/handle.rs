use sea_orm::DatabaseConnection;

/// A live connection handle scoped to one module's schema.
///
/// Modules never see the raw connection string or pool configuration —
/// only a ready-to-use `DatabaseConnection`, resolved by [`crate::DbManager`]
/// once per module name.
pub struct DbHandle {
    module_name: String,
    connection: DatabaseConnection,
}

impl DbHandle {
    #[must_use]
    pub fn new(module_name: impl Into<String>, connection: DatabaseConnection) -> Self {
        Self {
            module_name: module_name.into(),
            connection,
        }
    }

    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}
