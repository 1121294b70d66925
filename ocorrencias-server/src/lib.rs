//! # Ocorrencias Server
//!
//! HTTP interface for the ocorrencias pipeline.
//!
//! ## Overview
//!
//! The server accepts carrier webhooks and manual schedule runs, turns them into
//! jobs and runs the worker pool, the scheduler tick and the maintenance
//! components in the same process:
//!
//! ```text
//! carrier ──POST /webhooks/:carrier/:slug──▶ ┌──────────────┐
//!                                            │    queue     │──▶ worker pool ──▶ ingestion
//! operator ──POST /jobs/run/:schedule_id───▶ │ (jobs, DLQ)  │         │
//!                                            └──────────────┘         ▼
//!                     scheduler tick ──lock──▶ enqueue        carrier HTTP target
//! ```
//!
//! ## Routes
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `POST` | `/webhooks/:carrier/:slug` | `200 {carrier, slug, received}` |
//! | `POST` | `/jobs/run/:schedule_id` | `202 {jobId}` |
//! | `GET` | `/jobs/:id` | job status |
//! | `GET` | `/queues/health` | `{ativos, repeatables, faltando, sobrando}` |
//! | `GET` | `/health` | liveness |
//!
//! ### Starting the server
//!
//! ```rust,ignore
//! use ocorrencias::config::Config;
//! use ocorrencias_server::OcorrenciasServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = OcorrenciasServer::new(Config::from_env()?).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handler;
pub mod replay;
pub mod server;

pub use error::{Error, Result};
pub use server::{router, AppState, OcorrenciasServer};
