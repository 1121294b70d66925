//! 处理器模块
//! Processor module
//!
//! 每种作业类型一个处理器：轮询队列、在信号量限制的并发下执行处理器，
//! 每次运行写入执行记录，然后确认或失败
//!
//! One processor per job type: polls the queue, runs the handler under a semaphore-bounded
//! concurrency, writes an execution record for every run, then acks or fails the job
//!
//! ## 执行记录 / Execution records
//!
//! - 运行开始前写入 `RUNNING`
//!   - `RUNNING` is written before the handler starts
//! - 成功时更新为 `SUCCESS` 并保存响应快照
//!   - On success it becomes `SUCCESS` with the response snapshot
//! - 失败或超时时更新为 `ERROR` 并保存错误信息
//!   - On failure or timeout it becomes `ERROR` with the error message
//!
//! 永久错误（见 [`Error::is_retriable`](crate::error::Error::is_retriable)）不再消耗退避预算，直接进入死信队列
//! Permanent errors (see [`Error::is_retriable`](crate::error::Error::is_retriable)) skip the backoff budget and go to the DLQ
//!
//! ## 使用示例 / Usage Example
//!
//! ```rust,no_run
//! use ocorrencias::backend::memdb::{MemoryBroker, MemoryStore};
//! use ocorrencias::components::processor::{Processor, ProcessorParams};
//! use ocorrencias::queue::Queue;
//! use ocorrencias::registry::JobRegistry;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> ocorrencias::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let registry = Arc::new(JobRegistry::with_defaults(store.clone(), Duration::from_secs(30))?);
//! let queue = Queue::new(Arc::new(MemoryBroker::new()), registry.job_types());
//!
//! let mut processor = Processor::new(ProcessorParams {
//!   job_type: "run-agendamento".to_string(),
//!   queue,
//!   store,
//!   handler: registry,
//!   concurrency: 2,
//!   poll_interval: Duration::from_millis(200),
//!   job_timeout: Duration::from_secs(120),
//!   shutdown_timeout: Duration::from_secs(10),
//! });
//! processor.start();
//! processor.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::base::Store;
use crate::error::{Error, Result};
use crate::job::JobInfo;
use crate::model::{ExecutionStatus, NewExecution};
use crate::queue::{FailOutcome, Queue};
use crate::registry::Handler;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// 处理器参数
/// Processor parameters
pub struct ProcessorParams {
  pub job_type: String,
  pub queue: Queue,
  pub store: Arc<dyn Store>,
  pub handler: Arc<dyn Handler>,
  pub concurrency: usize,
  pub poll_interval: Duration,
  pub job_timeout: Duration,
  pub shutdown_timeout: Duration,
}

/// 单次运行的结果
/// Result of a single run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
  Completed,
  Failed(FailOutcome),
}

/// 执行一次作业需要的依赖
/// What running one job needs
#[derive(Clone)]
pub struct JobRunner {
  queue: Queue,
  store: Arc<dyn Store>,
  handler: Arc<dyn Handler>,
  job_timeout: Duration,
}

impl JobRunner {
  pub fn new(
    queue: Queue,
    store: Arc<dyn Store>,
    handler: Arc<dyn Handler>,
    job_timeout: Duration,
  ) -> Self {
    Self {
      queue,
      store,
      handler,
      job_timeout,
    }
  }

  /// 运行一个已出队的作业：写执行记录、调用处理器、确认或失败
  /// Run a dequeued job: write the execution record, call the handler, then ack or fail
  pub async fn run(&self, job: JobInfo) -> Result<RunOutcome> {
    let span = tracing::info_span!(
      "job",
      job_id = %job.id,
      job_type = %job.job_type,
      trace_id = %job.trace_id,
      attempt = job.attempts,
    );
    self.run_inner(job).instrument(span).await
  }

  async fn run_inner(&self, job: JobInfo) -> Result<RunOutcome> {
    let execution = match self
      .store
      .start_execution(NewExecution {
        job_id: Some(job.id.clone()),
        schedule_id: job.schedule_id(),
        job_type: job.job_type.clone(),
        attempt_number: job.attempts,
        request_payload: Value::Object(job.payload.clone()),
        trace_id: job.trace_id.clone(),
      })
      .await
    {
      Ok(execution) => execution,
      Err(e) => {
        tracing::error!(error = %e, "Failed to write execution record");
        let outcome = self.queue.fail_with(&job, &e).await?;
        return Ok(RunOutcome::Failed(outcome));
      }
    };

    let result = match tokio::time::timeout(self.job_timeout, self.handler.process_job(&job)).await
    {
      Ok(result) => result,
      Err(_) => {
        tracing::warn!(timeout = ?self.job_timeout, "Job timed out");
        Err(Error::Timeout)
      }
    };

    match result {
      Ok(response) => {
        if let Err(e) = self
          .store
          .finish_execution(execution.id, ExecutionStatus::Success, Some(response), None)
          .await
        {
          tracing::error!(execution_id = execution.id, error = %e, "Failed to close execution record");
        }
        self.queue.ack(&job).await?;
        tracing::info!("Job completed");
        Ok(RunOutcome::Completed)
      }
      Err(e) => {
        let message = e.to_string();
        let response = match &e {
          Error::HttpStatus { status, body } => Some(json!({"status": status, "body": body})),
          _ => None,
        };
        if let Err(err) = self
          .store
          .finish_execution(
            execution.id,
            ExecutionStatus::Error,
            response,
            Some(message),
          )
          .await
        {
          tracing::error!(execution_id = execution.id, error = %err, "Failed to close execution record");
        }
        let outcome = self.queue.fail_with(&job, &e).await?;
        Ok(RunOutcome::Failed(outcome))
      }
    }
  }
}

/// 处理器 - 负责从队列中取出某一类型的作业并处理
/// Processor - dequeues and processes jobs of one type
pub struct Processor {
  job_type: String,
  runner: JobRunner,
  concurrency: usize,
  poll_interval: Duration,
  shutdown_timeout: Duration,

  // 信号量用于限制并发工作者数量
  // Semaphore to limit number of concurrent workers
  sema: Arc<Semaphore>,

  cancel: CancellationToken,
  handle: Option<JoinHandle<()>>,
  active_workers: Arc<AtomicUsize>,
}

impl Processor {
  pub fn new(params: ProcessorParams) -> Self {
    let concurrency = params.concurrency.max(1);
    Self {
      job_type: params.job_type,
      runner: JobRunner::new(params.queue, params.store, params.handler, params.job_timeout),
      concurrency,
      poll_interval: params.poll_interval,
      shutdown_timeout: params.shutdown_timeout,
      sema: Arc::new(Semaphore::new(concurrency)),
      cancel: CancellationToken::new(),
      handle: None,
      active_workers: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn job_type(&self) -> &str {
    &self.job_type
  }

  pub fn concurrency(&self) -> usize {
    self.concurrency
  }

  /// 正在运行的作业数量
  /// Number of jobs currently running
  pub fn active_workers(&self) -> usize {
    self.active_workers.load(Ordering::Relaxed)
  }

  /// 启动处理器主循环
  /// Start the processor loop
  pub fn start(&mut self) {
    if self.handle.is_some() {
      return;
    }
    let job_types = vec![self.job_type.clone()];
    let runner = self.runner.clone();
    let sema = Arc::clone(&self.sema);
    let cancel = self.cancel.clone();
    let poll_interval = self.poll_interval;
    let active_workers = Arc::clone(&self.active_workers);

    let handle = tokio::spawn(async move {
      loop {
        if cancel.is_cancelled() {
          break;
        }

        // 等待空闲的工作者槽位
        // Wait for a free worker slot
        let permit = tokio::select! {
          permit = sema.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => break,
          },
          _ = cancel.cancelled() => break,
        };

        match runner.queue.dequeue(&job_types).await {
          Ok(Some(job)) => {
            active_workers.fetch_add(1, Ordering::Relaxed);
            let runner = runner.clone();
            let active_workers = Arc::clone(&active_workers);
            tokio::spawn(async move {
              let _permit = permit;
              if let Err(e) = runner.run(job).await {
                tracing::error!(error = %e, "Failed to settle job");
              }
              active_workers.fetch_sub(1, Ordering::Relaxed);
            });
          }
          Ok(None) => {
            drop(permit);
            tokio::select! {
              _ = tokio::time::sleep(poll_interval) => {}
              _ = cancel.cancelled() => break,
            }
          }
          Err(e) => {
            tracing::error!(error = %e, "Dequeue error");
            drop(permit);
            tokio::select! {
              _ = tokio::time::sleep(Duration::from_secs(1)) => {}
              _ = cancel.cancelled() => break,
            }
          }
        }
      }
      tracing::debug!("Processor loop exited");
    });

    self.handle = Some(handle);
  }

  /// 停止取新作业（不等待工作者完成）
  /// Stop taking new jobs (without waiting for workers)
  pub fn stop(&self) {
    self.cancel.cancel();
  }

  /// 关闭处理器，在关闭超时内等待运行中的作业完成
  /// Shut down, waiting up to the shutdown timeout for running jobs
  pub async fn shutdown(&mut self) {
    self.stop();
    if let Some(handle) = self.handle.take() {
      let _ = handle.await;
    }

    let wait_all = self.sema.acquire_many(self.concurrency as u32);
    match tokio::time::timeout(self.shutdown_timeout, wait_all).await {
      Ok(_) => tracing::info!(job_type = %self.job_type, "All workers have finished"),
      Err(_) => tracing::warn!(
        job_type = %self.job_type,
        active = self.active_workers(),
        "Shutdown timeout elapsed with jobs still running"
      ),
    }
  }
}
