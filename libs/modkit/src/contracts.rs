use async_trait::async_trait;
use axum::Router;
use tokio_util::sync::CancellationToken;

/// Core module: wiring and dependency resolution. Do not assume a migrated
/// schema or a running REST/stateful phase here.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    async fn init(&self, ctx: &crate::context::ModuleCtx) -> anyhow::Result<()>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Modules that own a schema run their migrations here, after `init` and
/// before any REST registration or `start`.
#[async_trait]
pub trait DbModule: Send + Sync {
    async fn migrate(&self, db: &modkit_db::DbHandle) -> anyhow::Result<()>;
}

/// Modules that expose HTTP endpoints register them on the shared router.
/// Registration is pure wiring and must be synchronous; it runs after DB
/// migrations and before the start phase.
pub trait RestfulModule: Send + Sync {
    fn register_rest(&self, ctx: &crate::context::ModuleCtx, router: Router) -> anyhow::Result<Router>;
}

/// Modules with a running lifecycle beyond wiring: triggers, brokers,
/// schedulers, HTTP listeners. `start` and `stop` both honor cancellation.
#[async_trait]
pub trait StatefulModule: Send + Sync {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}
