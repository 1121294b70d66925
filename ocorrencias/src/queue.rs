//! 队列模块
//! Queue module
//!
//! 在队列后端之上提供入队、出队、确认与失败处理
//! Enqueue, dequeue, ack and fail on top of a queue backend

use crate::base::constants::{DEFAULT_JOB_TIMEOUT, LEASE_MARGIN};
use crate::base::Broker;
use crate::error::{Error, Result};
use crate::job::{Job, JobInfo, JobOptions};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// 失败处理的结果
/// What `fail` did with the job
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
  /// 将在退避后重试
  /// Will be retried after the backoff
  Retrying {
    delay: Duration,
    next_attempt: u32,
  },
  /// 已移入死信队列
  /// Moved to the DLQ
  Dead,
}

/// 作业队列
/// Job queue
///
/// 只接受已注册处理器的作业类型
/// Only job types with a registered handler are accepted
#[derive(Clone)]
pub struct Queue {
  broker: Arc<dyn Broker>,
  job_types: Arc<BTreeSet<String>>,
  default_options: JobOptions,
  lease: Duration,
}

impl Queue {
  pub fn new<I, S>(broker: Arc<dyn Broker>, job_types: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      broker,
      job_types: Arc::new(job_types.into_iter().map(Into::into).collect()),
      default_options: JobOptions::default(),
      lease: DEFAULT_JOB_TIMEOUT + LEASE_MARGIN,
    }
  }

  /// 出队租约时长，应大于作业超时
  /// Dequeue lease, which should outlast the job timeout
  pub fn with_lease(mut self, lease: Duration) -> Self {
    self.lease = lease;
    self
  }

  pub fn lease(&self) -> Duration {
    self.lease
  }

  /// 设置默认的尝试次数与退避
  /// Set the default attempts and backoff
  pub fn with_default_options(mut self, options: JobOptions) -> Self {
    self.default_options = options;
    self
  }

  pub fn default_options(&self) -> JobOptions {
    self.default_options.clone()
  }

  pub fn broker(&self) -> &Arc<dyn Broker> {
    &self.broker
  }

  pub fn job_types(&self) -> Vec<String> {
    self.job_types.iter().cloned().collect()
  }

  pub fn is_known(&self, job_type: &str) -> bool {
    self.job_types.contains(job_type)
  }

  /// 入队，返回作业 ID
  /// Enqueue, returning the job id
  pub async fn enqueue(&self, job_type: &str, payload: Value, options: JobOptions) -> Result<String> {
    let job = Job::new(job_type, payload)?.with_options(options);
    Ok(self.enqueue_job(job).await?.id)
  }

  /// 入队作业
  /// Enqueue a job
  pub async fn enqueue_job(&self, job: Job) -> Result<JobInfo> {
    if !self.is_known(&job.job_type) {
      return Err(Error::unknown_job_type(job.job_type));
    }
    let info = self.broker.enqueue(JobInfo::from_job(&job, Utc::now())).await?;
    tracing::debug!(
      job_id = %info.id,
      job_type = %info.job_type,
      trace_id = %info.trace_id,
      "Job enqueued"
    );
    Ok(info)
  }

  pub async fn dequeue(&self, job_types: &[String]) -> Result<Option<JobInfo>> {
    self.broker.dequeue(job_types, self.lease).await
  }

  pub async fn ack(&self, job: &JobInfo) -> Result<()> {
    self.broker.complete(job).await
  }

  /// 失败：预算未耗尽时按 `backoff_base * 2^n` 重试，否则移入死信队列
  /// Fail: retry after `backoff_base * 2^n` while budget remains, otherwise move to the DLQ
  pub async fn fail(&self, job: &JobInfo, error_msg: &str) -> Result<FailOutcome> {
    if job.is_exhausted() {
      self.bury(job, error_msg, "Job exhausted its attempts, moved to DLQ").await?;
      return Ok(FailOutcome::Dead);
    }

    let delay = job.next_retry_delay();
    let retry_at = Utc::now()
      + chrono::Duration::from_std(delay).map_err(|e| Error::queue(e.to_string()))?;
    self.broker.retry(job, retry_at, error_msg).await?;
    tracing::warn!(
      job_id = %job.id,
      job_type = %job.job_type,
      trace_id = %job.trace_id,
      attempt = job.attempts,
      max_attempts = job.max_attempts,
      delay_ms = delay.as_millis() as u64,
      error = %error_msg,
      "Job failed, retry scheduled"
    );
    Ok(FailOutcome::Retrying {
      delay,
      next_attempt: job.attempts + 1,
    })
  }

  /// 按错误类型失败：不可重试的错误直接进入死信队列
  /// Fail by error kind: a non-retriable error goes straight to the DLQ
  pub async fn fail_with(&self, job: &JobInfo, error: &Error) -> Result<FailOutcome> {
    let message = error.to_string();
    if error.is_retriable() {
      return self.fail(job, &message).await;
    }
    self.bury(job, &message, "Job failed with a permanent error, moved to DLQ").await?;
    Ok(FailOutcome::Dead)
  }

  async fn bury(&self, job: &JobInfo, error_msg: &str, reason: &str) -> Result<()> {
    self.broker.archive(job, error_msg).await?;
    tracing::error!(
      job_id = %job.id,
      job_type = %job.job_type,
      trace_id = %job.trace_id,
      attempts = job.attempts,
      error = %error_msg,
      "{reason}"
    );
    Ok(())
  }

  pub async fn get_job(&self, id: &str) -> Result<Option<JobInfo>> {
    self.broker.get_job(id).await
  }
}
