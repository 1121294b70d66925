//! 作业注册表
//! Job registry
//!
//! 启动时建立 作业类型 -> 处理器 的映射，以及每种类型的并发数
//! Maps job type -> handler, plus per-type concurrency, built once at startup
//!
//! ```rust,no_run
//! use ocorrencias::registry::JobRegistry;
//! use ocorrencias::job::JobInfo;
//! use serde_json::json;
//!
//! let mut registry = JobRegistry::new();
//! registry.handle_async_func("push-callback", |job: JobInfo| async move {
//!   Ok(json!({"job": job.id}))
//! });
//! registry.set_concurrency("push-callback", 3);
//! ```

use crate::base::constants::{
  DEFAULT_WORKER_CONCURRENCY, JOB_PROCESS_WEBHOOK, JOB_RUN_AGENDAMENTO, MAX_WORKER_CONCURRENCY,
};
use crate::base::Store;
use crate::error::{Error, Result};
use crate::handlers::{DispatchHandler, WebhookHandler};
use crate::ingestion::Ingestor;
use crate::job::JobInfo;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 作业处理器
/// Job handler
///
/// 返回值是写入执行记录的响应快照
/// The returned value is the response snapshot stored on the execution record
#[async_trait]
pub trait Handler: Send + Sync {
  async fn process_job(&self, job: &JobInfo) -> Result<Value>;
}

/// 异步闭包处理器
/// Async closure handler
pub struct AsyncHandlerFunc<F> {
  func: F,
}

impl<F> AsyncHandlerFunc<F> {
  pub fn new(func: F) -> Self {
    Self { func }
  }
}

#[async_trait]
impl<F, Fut> Handler for AsyncHandlerFunc<F>
where
  F: Fn(JobInfo) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value>> + Send + 'static,
{
  async fn process_job(&self, job: &JobInfo) -> Result<Value> {
    (self.func)(job.clone()).await
  }
}

struct Registration {
  handler: Arc<dyn Handler>,
  concurrency: usize,
}

/// 作业注册表
/// Job registry
#[derive(Default)]
pub struct JobRegistry {
  entries: BTreeMap<String, Registration>,
}

impl JobRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册处理器，已存在时替换
  /// Register a handler, replacing any previous one
  pub fn handle<H>(&mut self, job_type: &str, handler: H)
  where
    H: Handler + 'static,
  {
    self.handle_arc(job_type, Arc::new(handler));
  }

  pub fn handle_arc(&mut self, job_type: &str, handler: Arc<dyn Handler>) {
    let concurrency = self
      .entries
      .get(job_type)
      .map(|r| r.concurrency)
      .unwrap_or(DEFAULT_WORKER_CONCURRENCY);
    self.entries.insert(
      job_type.to_string(),
      Registration {
        handler,
        concurrency,
      },
    );
  }

  /// 注册异步处理函数
  /// Register an async handler function
  pub fn handle_async_func<F, Fut>(&mut self, job_type: &str, func: F)
  where
    F: Fn(JobInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    self.handle(job_type, AsyncHandlerFunc::new(func));
  }

  /// 设置并发数，限制在 1 到 5 之间
  /// Set the concurrency, clamped to 1..=5
  pub fn set_concurrency(&mut self, job_type: &str, concurrency: usize) {
    if let Some(entry) = self.entries.get_mut(job_type) {
      entry.concurrency = concurrency.clamp(1, MAX_WORKER_CONCURRENCY);
    }
  }

  pub fn get(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
    self.entries.get(job_type).map(|r| r.handler.clone())
  }

  pub fn concurrency(&self, job_type: &str) -> usize {
    self
      .entries
      .get(job_type)
      .map(|r| r.concurrency)
      .unwrap_or(DEFAULT_WORKER_CONCURRENCY)
  }

  pub fn is_registered(&self, job_type: &str) -> bool {
    self.entries.contains_key(job_type)
  }

  pub fn job_types(&self) -> Vec<String> {
    self.entries.keys().cloned().collect()
  }

  /// `with_defaults` 注册的作业类型
  /// Job types registered by `with_defaults`
  pub fn default_job_types() -> Vec<String> {
    let mut types = vec![
      JOB_PROCESS_WEBHOOK.to_string(),
      JOB_RUN_AGENDAMENTO.to_string(),
    ];
    types.sort();
    types
  }

  /// 内置处理器：调度分发与 webhook 摄取
  /// Built-in handlers: schedule dispatch and webhook ingestion
  pub fn with_defaults(store: Arc<dyn Store>, http_timeout: Duration) -> Result<Self> {
    let ingestor = Ingestor::new(store.clone());
    let mut registry = Self::new();
    registry.handle(
      JOB_RUN_AGENDAMENTO,
      DispatchHandler::new(store, ingestor.clone(), http_timeout)?,
    );
    registry.handle(JOB_PROCESS_WEBHOOK, WebhookHandler::new(ingestor));
    Ok(registry)
  }
}

#[async_trait]
impl Handler for JobRegistry {
  async fn process_job(&self, job: &JobInfo) -> Result<Value> {
    match self.entries.get(&job.job_type) {
      Some(entry) => entry.handler.process_job(job).await,
      None => Err(Error::unknown_job_type(job.job_type.clone())),
    }
  }
}
