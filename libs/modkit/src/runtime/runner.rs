//! Drives a [`ModuleRegistry`](crate::registry::ModuleRegistry) through its
//! lifecycle phases: DB migration, init, REST registration, start, and
//! (on shutdown) stop. This is the Lifecycle Coordinator's runtime half —
//! the module graph itself is built once, ahead of time, by
//! [`ModuleRegistry::discover_and_build`](crate::registry::ModuleRegistry::discover_and_build).
//!
//! Phase order: **DB → init → REST → start → wait → stop**.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::client_hub::ClientHub;
use crate::config::ConfigProvider;
use crate::context::ModuleContextBuilder;
use crate::workflow::WorkflowDispatcher;

/// How the runner should provide DBs to modules.
pub enum DbOptions {
    /// No database integration. `ModuleCtx::db_optional()` is always `None`.
    None,
    /// Resolve per-module handles through a `DbManager`.
    Manager(Arc<modkit_db::DbManager>),
}

/// Whether the module-contributed REST router is actually served, and
/// where.
pub enum HttpOptions {
    /// No module registered REST routes, or the deployment has no wire
    /// surface; the assembled router is built but never bound.
    Disabled,
    /// Bind the shared router built by every `RestfulModule` and serve it
    /// until shutdown is observed.
    Bind(SocketAddr),
}

/// How the runner learns it's time to stop.
pub enum ShutdownOptions {
    /// Wait on OS signals (SIGINT/SIGTERM / Ctrl-C).
    Signals,
    /// Caller owns the token and cancels it themselves (e.g. tests).
    Token(CancellationToken),
    /// Arbitrary future; the runner stops once it resolves.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

pub struct RunOptions {
    pub modules_cfg: Arc<dyn ConfigProvider>,
    pub db: DbOptions,
    pub http: HttpOptions,
    pub shutdown: ShutdownOptions,
}

/// Run the full module lifecycle: build the registry, migrate, init,
/// register REST routes, start, wait for shutdown, then stop in reverse
/// order. Returns once the stop phase has completed.
///
/// # Errors
/// Returns the first build-phase or lifecycle-phase failure. Build-phase
/// errors (dependency cycles, unknown dependencies) and DB/init/start
/// failures are fatal; the stop phase itself never fails.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let hub = Arc::new(ClientHub::default());
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(token) => token.clone(),
        ShutdownOptions::Signals | ShutdownOptions::Future(_) => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let ctrl_c = async {
                    let _ = tokio::signal::ctrl_c().await;
                };

                #[cfg(unix)]
                let terminate = async {
                    let Ok(mut sigterm) =
                        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    else {
                        return;
                    };
                    sigterm.recv().await;
                };

                #[cfg(not(unix))]
                let terminate = std::future::pending::<()>();

                tokio::select! {
                    () = ctrl_c => tracing::info!("shutdown: ctrl-c received"),
                    () = terminate => tracing::info!("shutdown: sigterm received"),
                }
                cancel.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                cancel.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token controls lifecycle");
        }
    }

    let registry = crate::registry::ModuleRegistry::discover_and_build(opts.modules_cfg.as_ref())?;

    let mut dispatcher = WorkflowDispatcher::new();
    for entry in registry.modules() {
        if let Some(handler) = entry.workflow_handler.clone() {
            dispatcher.register(handler);
        }
    }
    hub.register::<WorkflowDispatcher>(Arc::new(dispatcher));

    let db_manager = match &opts.db {
        DbOptions::Manager(manager) => Some(manager.clone()),
        DbOptions::None => None,
    };
    let ctx_builder = ModuleContextBuilder::new(opts.modules_cfg.clone(), hub, cancel.clone(), db_manager);

    tracing::info!("phase: db");
    registry.run_db_phase(&ctx_builder).await?;

    tracing::info!("phase: init");
    registry.run_init_phase(&ctx_builder).await?;

    tracing::info!("phase: rest");
    let router: Router = registry.run_rest_phase(&ctx_builder, Router::new()).await?;

    let server_task = match opts.http {
        HttpOptions::Disabled => None,
        HttpOptions::Bind(addr) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "phase: http bind");
            let shutdown_signal = cancel.clone();
            Some(tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
                    .await;
                if let Err(source) = result {
                    tracing::error!(error = %source, "http server exited with an error");
                }
            }))
        }
    };

    tracing::info!("phase: start");
    registry.run_start_phase(cancel.clone()).await?;

    cancel.cancelled().await;

    if let Some(task) = server_task {
        let _ignored = task.await;
    }

    tracing::info!("phase: stop");
    registry.run_stop_phase(cancel).await;
    Ok(())
}
