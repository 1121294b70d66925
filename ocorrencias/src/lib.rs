//! # Ocorrências
//!
//! 承运商事件（ocorrências）采集管线：持久化作业队列、死信队列、带锁的调度器与幂等的事件写入
//! Carrier delivery-event (ocorrências) pipeline: durable job queue, dead-letter queue,
//! lock-guarded scheduler and idempotent event ingestion
//!
//! ## 特性
//! ## Features
//!
//! - 至少一次执行，指数退避重试，耗尽后进入死信队列
//!   - At-least-once execution, exponential backoff retries, dead-letter queue once exhausted
//! - 多实例调度器通过窗口锁保证每个窗口只入队一次
//!   - Multi-instance scheduler enqueues once per window thanks to a window lock
//! - 承运商字段回退链，代码映射与未映射代码的管理员错误
//!   - Carrier field fallback chains, code mapping and admin errors for unmapped codes
//! - 按 `occurred_at` 投影运单当前状态
//!   - Shipment status projection by `occurred_at`
//! - PostgresSQL 或内存后端，可选 Redis 锁
//!   - PostgresSQL or memory backend, optional Redis locks
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocorrencias::backend::Backend;
//! use ocorrencias::queue::Queue;
//! use ocorrencias::registry::JobRegistry;
//! use ocorrencias::worker::{WorkerConfig, WorkerPool};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ocorrencias::error::Result<()> {
//!     let backend = Backend::memory();
//!     let registry = Arc::new(JobRegistry::with_defaults(
//!         backend.store.clone(),
//!         Duration::from_secs(30),
//!     )?);
//!     let queue = Queue::new(backend.broker.clone(), registry.job_types());
//!
//!     let mut pool = WorkerPool::new(queue, backend.store.clone(), registry, WorkerConfig::default());
//!     pool.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod base;
pub mod components;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ingestion;
pub mod inspector;
pub mod job;
pub mod model;
pub mod projector;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use base::constants::VERSION;
