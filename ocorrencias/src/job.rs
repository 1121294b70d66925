//! 作业模块
//! Job module
//!
//! 定义作业、作业选项、退避策略与持久化的作业信息
//! Defines jobs, job options, backoff policies and the persisted job record

use crate::base::constants::{DEFAULT_ATTEMPTS, DEFAULT_BACKOFF_BASE};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// 作业负载，总是一个 JSON 对象
/// Job payload, always a JSON object
pub type Payload = Map<String, Value>;

/// 作业状态
/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  /// 等待处理
  Waiting,
  /// 正在处理
  Active,
  /// 已完成
  Completed,
  /// 失败，等待退避后重试
  Failed,
  /// 重试预算耗尽，位于死信队列
  Dead,
}

impl JobStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Waiting => "waiting",
      JobStatus::Active => "active",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
      JobStatus::Dead => "dead",
    }
  }

  /// 终态：完成或死信
  /// Terminal states: completed or dead
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Dead)
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "waiting" => Ok(JobStatus::Waiting),
      "active" => Ok(JobStatus::Active),
      "completed" => Ok(JobStatus::Completed),
      "failed" => Ok(JobStatus::Failed),
      "dead" => Ok(JobStatus::Dead),
      other => Err(Error::queue(format!("unknown job status: {other}"))),
    }
  }
}

/// 退避策略
/// Backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
  /// 固定延迟
  /// Fixed delay
  Fixed(Duration),
  /// 指数退避：`base * 2^attempt`
  /// Exponential backoff: `base * 2^attempt`
  Exponential(Duration),
}

impl Backoff {
  /// 计算第 `attempt` 次重试（从 0 开始）前的等待时间
  /// Delay before retry number `attempt` (zero based)
  pub fn delay(&self, attempt: u32) -> Duration {
    match self {
      Backoff::Fixed(d) => *d,
      Backoff::Exponential(base) => base.saturating_mul(1u32 << attempt.min(20)),
    }
  }

  pub fn base(&self) -> Duration {
    match self {
      Backoff::Fixed(d) | Backoff::Exponential(d) => *d,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Backoff::Fixed(_) => "fixed",
      Backoff::Exponential(_) => "exponential",
    }
  }

  /// 从持久化形式恢复
  /// Rebuild from the persisted (kind, millis) pair
  pub fn from_parts(kind: &str, base_ms: i64) -> Self {
    let base = Duration::from_millis(base_ms.max(0) as u64);
    match kind {
      "fixed" => Backoff::Fixed(base),
      _ => Backoff::Exponential(base),
    }
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Backoff::Exponential(DEFAULT_BACKOFF_BASE)
  }
}

/// 作业选项
/// Job options
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
  /// 最大尝试次数（包含第一次）
  /// Maximum attempts, the first run included
  pub attempts: u32,
  pub backoff: Backoff,
  pub job_id: Option<String>,
  pub trace_id: Option<String>,
  /// 首次执行前的延迟
  /// Delay before the first run
  pub delay: Option<Duration>,
}

impl Default for JobOptions {
  fn default() -> Self {
    Self {
      attempts: DEFAULT_ATTEMPTS,
      backoff: Backoff::default(),
      job_id: None,
      trace_id: None,
      delay: None,
    }
  }
}

impl JobOptions {
  pub fn with_attempts(mut self, attempts: u32) -> Self {
    self.attempts = attempts.max(1);
    self
  }

  /// 设置指数退避基数
  /// Set the exponential backoff base
  pub fn with_backoff_base(mut self, base: Duration) -> Self {
    self.backoff = Backoff::Exponential(base);
    self
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_job_id<S: Into<String>>(mut self, id: S) -> Self {
    self.job_id = Some(id.into());
    self
  }

  pub fn with_trace_id<S: Into<String>>(mut self, trace_id: S) -> Self {
    self.trace_id = Some(trace_id.into());
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

/// 待入队的作业
/// A job to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
  pub job_type: String,
  pub payload: Payload,
  pub options: JobOptions,
}

impl Job {
  /// 创建新作业，负载必须是 JSON 对象（`null` 视为空对象）
  /// Create a new job; the payload must be a JSON object (`null` counts as empty)
  pub fn new<S: Into<String>>(job_type: S, payload: Value) -> Result<Self> {
    let job_type = job_type.into();
    if job_type.trim().is_empty() {
      return Err(Error::InvalidPayload("job type cannot be empty".to_string()));
    }
    let payload = match payload {
      Value::Object(map) => map,
      Value::Null => Map::new(),
      other => {
        return Err(Error::InvalidPayload(format!(
          "payload must be a JSON object, got {other}"
        )))
      }
    };
    Ok(Self {
      job_type,
      payload,
      options: JobOptions::default(),
    })
  }

  pub fn with_options(mut self, options: JobOptions) -> Self {
    self.options = options;
    self
  }

  pub fn get_type(&self) -> &str {
    &self.job_type
  }
}

/// 生成作业 ID
/// Generate a job ID
pub fn generate_job_id() -> String {
  Uuid::new_v4().to_string()
}

/// 生成追踪 ID
/// Generate a trace ID
pub fn generate_trace_id() -> String {
  Uuid::new_v4().simple().to_string()
}

/// 持久化的作业信息
/// Persisted job record
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
  pub id: String,
  pub job_type: String,
  pub payload: Payload,
  pub trace_id: String,
  /// 已进行的尝试次数
  /// Attempts made so far
  pub attempts: u32,
  pub max_attempts: u32,
  pub backoff: Backoff,
  pub status: JobStatus,
  pub enqueued_at: DateTime<Utc>,
  /// 最早可被取出的时间
  /// Earliest time the job may be dequeued
  pub process_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  /// `active` 作业的租约截止时间，过期后由 Recoverer 回收
  /// Lease deadline of an `active` job; the Recoverer reclaims it once expired
  pub lease_until: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub failed_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

impl JobInfo {
  /// 从作业构造一条等待中的记录
  /// Build a waiting record from a job
  pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
    let trace_id = job
      .options
      .trace_id
      .clone()
      .or_else(|| {
        job
          .payload
          .get("trace_id")
          .and_then(Value::as_str)
          .map(str::to_string)
      })
      .unwrap_or_else(generate_trace_id);
    let process_at = match job.options.delay.and_then(|d| chrono::Duration::from_std(d).ok()) {
      Some(delay) => now + delay,
      None => now,
    };
    Self {
      id: job.options.job_id.clone().unwrap_or_else(generate_job_id),
      job_type: job.job_type.clone(),
      payload: job.payload.clone(),
      trace_id,
      attempts: 0,
      max_attempts: job.options.attempts.max(1),
      backoff: job.options.backoff,
      status: JobStatus::Waiting,
      enqueued_at: now,
      process_at,
      started_at: None,
      lease_until: None,
      finished_at: None,
      failed_at: None,
      last_error: None,
    }
  }

  /// 租约在 `now` 之前已过期
  /// Whether the lease lapsed before `now`
  pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
    self.status == JobStatus::Active && self.lease_until.map(|l| l < now).unwrap_or(false)
  }

  /// 尝试预算已耗尽
  /// Retry budget exhausted
  pub fn is_exhausted(&self) -> bool {
    self.attempts >= self.max_attempts
  }

  /// 当前失败后的重试延迟
  /// Delay before the next retry after the current failed attempt
  pub fn next_retry_delay(&self) -> Duration {
    self.backoff.delay(self.attempts.saturating_sub(1))
  }

  /// 负载中的承运商标识（`transportadora` 或 `transportadora_id`）
  /// Carrier identifier from the payload (`transportadora` or `transportadora_id`)
  pub fn carrier(&self) -> Option<String> {
    carrier_of(&self.payload)
  }

  /// 负载中的调度 ID
  /// Schedule id carried by the payload
  pub fn schedule_id(&self) -> Option<i64> {
    match self.payload.get("schedule_id")? {
      Value::Number(n) => n.as_i64(),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    }
  }
}

/// 读取负载中的承运商标识
/// Read the carrier identifier out of a payload
pub fn carrier_of(payload: &Payload) -> Option<String> {
  ["transportadora", "transportadora_id"]
    .iter()
    .filter_map(|field| payload.get(*field))
    .find_map(|value| match value {
      Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    })
}
