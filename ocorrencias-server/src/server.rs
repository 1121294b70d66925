//! Ocorrencias server implementation
//!
//! Runs the HTTP interface, the worker pool and the background components
//! (scheduler, schedule sync, janitor, recoverer) in one process.

use crate::error::{Error, Result};
use crate::handler;
use axum::routing::{get, post};
use axum::Router;
use ocorrencias::backend::Backend;
use ocorrencias::base::constants::LEASE_MARGIN;
use ocorrencias::base::Store;
use ocorrencias::components::janitor::{Janitor, JanitorConfig};
use ocorrencias::components::recoverer::{Recoverer, RecovererConfig};
use ocorrencias::components::schedule_sync::{ScheduleSync, ScheduleSyncConfig};
use ocorrencias::config::Config;
use ocorrencias::queue::Queue;
use ocorrencias::registry::JobRegistry;
use ocorrencias::scheduler::{Scheduler, SchedulerConfig};
use ocorrencias::worker::{WorkerConfig, WorkerPool};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the HTTP handlers
pub struct AppState {
  /// Queue with the registered job types
  pub queue: Queue,
  /// Schedules, shipments and occurrences
  pub store: Arc<dyn Store>,
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/webhooks/:carrier/:slug", post(handler::receive_webhook))
    .route("/jobs/run/:schedule_id", post(handler::run_schedule))
    .route("/jobs/:id", get(handler::get_job))
    .route("/queues/health", get(handler::get_queue_health))
    .route("/health", get(handler::health))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Ocorrencias server
pub struct OcorrenciasServer {
  addr: SocketAddr,
  config: Config,
  backend: Backend,
  registry: Arc<JobRegistry>,
}

impl OcorrenciasServer {
  /// Connect the configured backends and register the built-in job types
  pub async fn new(config: Config) -> Result<Self> {
    config.validate()?;
    let addr = SocketAddr::from_str(&config.addr)
      .map_err(|e| Error::server(format!("invalid OCORRENCIAS_ADDR {}: {e}", config.addr)))?;
    let job_types = JobRegistry::default_job_types();
    let backend = Backend::connect(&config, &job_types).await?;
    Self::with_backend(addr, config, backend)
  }

  /// Create a server over already connected backends
  pub fn with_backend(addr: SocketAddr, config: Config, backend: Backend) -> Result<Self> {
    let mut registry = JobRegistry::with_defaults(backend.store.clone(), config.http_timeout)?;
    config.apply_concurrency(&mut registry);
    Ok(Self {
      addr,
      config,
      backend,
      registry: Arc::new(registry),
    })
  }

  pub fn queue(&self) -> Queue {
    Queue::new(self.backend.broker.clone(), self.registry.job_types())
      .with_default_options(self.config.job_options())
      .with_lease(self.config.job_timeout + LEASE_MARGIN)
  }

  /// Run until ctrl-c, then drain the workers
  pub async fn run(self) -> Result<()> {
    let queue = self.queue();
    let store = self.backend.store.clone();

    let mut pool = WorkerPool::new(
      queue.clone(),
      store.clone(),
      self.registry.clone(),
      WorkerConfig::from(&self.config),
    );
    pool.start()?;

    let scheduler = Scheduler::new(
      store.clone(),
      self.backend.locks.clone(),
      queue.clone(),
      SchedulerConfig {
        tick_interval: self.config.tick_interval,
        default_window_minutes: self.config.lock_ttl_minutes,
      },
    );
    info!(scheduler_id = %scheduler.id(), "Scheduler started");
    pool.spawn_component(Arc::new(scheduler));
    pool.spawn_component(Arc::new(ScheduleSync::new(
      store.clone(),
      self.backend.broker.clone(),
      ScheduleSyncConfig {
        sync_interval: self.config.sync_interval,
      },
    )));
    pool.spawn_component(Arc::new(Janitor::new(
      self.backend.broker.clone(),
      JanitorConfig {
        interval: self.config.janitor_interval,
        retention: self.config.job_retention,
      },
    )));

    pool.spawn_component(Arc::new(Recoverer::new(
      queue.clone(),
      RecovererConfig::default(),
    )));

    let app = router(Arc::new(AppState { queue, store }));
    let listener = tokio::net::TcpListener::bind(self.addr)
      .await
      .map_err(Error::Io)?;
    info!("Ocorrencias server listening on {}", self.addr);

    let result = axum::serve(listener, app)
      .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, stopping server...");
      })
      .await
      .map_err(Error::Io);

    pool.shutdown().await;
    result
  }
}
