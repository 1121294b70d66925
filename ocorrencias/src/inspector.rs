//! 死信队列检查器
//! Dead-letter queue inspector
//!
//! 提供按作业类型、入队日期区间与承运商过滤的查询和重放
//! Filtered listing and replay by job type, enqueue date range and carrier

use crate::base::Broker;
use crate::error::{Error, Result};
use crate::job::{JobInfo, JobStatus};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

/// 死信队列过滤条件
/// DLQ filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DlqFilter {
  /// 作业类型
  /// Job type
  pub name: Option<String>,
  /// 入队时间下界（含）
  /// Inclusive lower bound on the enqueue timestamp
  pub from: Option<DateTime<Utc>>,
  /// 入队时间上界（含）
  /// Inclusive upper bound on the enqueue timestamp
  pub to: Option<DateTime<Utc>>,
  /// 承运商
  /// Carrier
  pub carrier: Option<String>,
}

impl DlqFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_carrier<S: Into<String>>(mut self, carrier: S) -> Self {
    self.carrier = Some(carrier.into());
    self
  }

  pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
    self.from = from;
    self.to = to;
    self
  }

  /// 整天（UTC）
  /// A whole day (UTC)
  pub fn on_date(mut self, date: NaiveDate) -> Self {
    self.from = Some(start_of_day(date));
    self.to = Some(end_of_day(date));
    self
  }

  pub fn matches(&self, job: &JobInfo) -> bool {
    if job.status != JobStatus::Dead {
      return false;
    }
    if let Some(name) = &self.name {
      if &job.job_type != name {
        return false;
      }
    }
    if let Some(from) = self.from {
      if job.enqueued_at < from {
        return false;
      }
    }
    if let Some(to) = self.to {
      if job.enqueued_at > to {
        return false;
      }
    }
    if let Some(carrier) = &self.carrier {
      if job.carrier().as_deref() != Some(carrier.as_str()) {
        return false;
      }
    }
    true
  }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
  Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
  let end = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
  Utc.from_utc_datetime(&date.and_time(end))
}

/// 解析日期边界：`YYYY-MM-DD`（取当天开始或结束）或 RFC 3339
/// Parse a date bound: `YYYY-MM-DD` (start or end of that day) or RFC 3339
pub fn parse_date_bound(value: &str, end_of: bool) -> Result<DateTime<Utc>> {
  let value = value.trim();
  if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
    return Ok(if end_of {
      end_of_day(date)
    } else {
      start_of_day(date)
    });
  }
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::config(format!("invalid date '{value}': {e}")))
}

/// 检查器
/// Inspector
pub struct Inspector {
  broker: Arc<dyn Broker>,
}

impl Inspector {
  pub fn new(broker: Arc<dyn Broker>) -> Self {
    Self { broker }
  }

  /// 列出符合条件的死信作业
  /// List dead jobs matching the filter
  pub async fn list_dead(&self, filter: &DlqFilter) -> Result<Vec<JobInfo>> {
    self.broker.list_archived(filter).await
  }

  /// 重放单个死信作业
  /// Replay one dead job
  pub async fn replay_one(&self, id: &str) -> Result<JobInfo> {
    let job = self.broker.requeue_archived(id).await?;
    tracing::info!(
      job_id = %job.id,
      job_type = %job.job_type,
      trace_id = %job.trace_id,
      "Replayed job from DLQ"
    );
    Ok(job)
  }

  /// 重放所有匹配的死信作业，返回被重放的作业 ID
  /// Replay every matching dead job, returning the replayed ids
  ///
  /// 重放本身不幂等，下游效果需可重复
  /// Replay is not idempotent by itself; the downstream effect must be safe to repeat
  pub async fn replay(&self, filter: &DlqFilter) -> Result<Vec<String>> {
    let jobs = self.list_dead(filter).await?;
    let mut replayed = Vec::with_capacity(jobs.len());
    for job in jobs {
      match self.replay_one(&job.id).await {
        Ok(job) => replayed.push(job.id),
        // 另一个操作员可能已经重放了它
        Err(Error::JobNotFound { id }) => {
          tracing::warn!(job_id = %id, "Job left the DLQ before replay");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(replayed)
  }
}
