//! 作业实体
//! Job entity

use crate::job::{Backoff, JobInfo, JobStatus};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde_json::{Map, Value};

/// 作业状态枚举
/// Job state enum
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum JobState {
  #[sea_orm(string_value = "waiting")]
  Waiting,
  #[sea_orm(string_value = "active")]
  Active,
  #[sea_orm(string_value = "completed")]
  Completed,
  #[sea_orm(string_value = "failed")]
  Failed,
  #[sea_orm(string_value = "dead")]
  Dead,
}

impl From<JobStatus> for JobState {
  fn from(status: JobStatus) -> Self {
    match status {
      JobStatus::Waiting => JobState::Waiting,
      JobStatus::Active => JobState::Active,
      JobStatus::Completed => JobState::Completed,
      JobStatus::Failed => JobState::Failed,
      JobStatus::Dead => JobState::Dead,
    }
  }
}

impl From<JobState> for JobStatus {
  fn from(state: JobState) -> Self {
    match state {
      JobState::Waiting => JobStatus::Waiting,
      JobState::Active => JobStatus::Active,
      JobState::Completed => JobStatus::Completed,
      JobState::Failed => JobStatus::Failed,
      JobState::Dead => JobStatus::Dead,
    }
  }
}

/// 作业实体模型
/// Job entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: String,
  pub job_type: String,
  #[sea_orm(column_type = "JsonBinary")]
  pub payload: Json,
  pub trace_id: String,
  pub attempts: i32,
  pub max_attempts: i32,
  pub backoff_kind: String,
  pub backoff_base_ms: i64,
  pub state: JobState,
  /// 从负载中取出的承运商，供死信队列过滤
  /// Carrier taken from the payload, used by DLQ filters
  pub carrier: Option<String>,
  pub enqueued_at: DateTimeWithTimeZone,
  pub process_at: DateTimeWithTimeZone,
  pub started_at: Option<DateTimeWithTimeZone>,
  pub lease_until: Option<DateTimeWithTimeZone>,
  pub finished_at: Option<DateTimeWithTimeZone>,
  pub failed_at: Option<DateTimeWithTimeZone>,
  #[sea_orm(column_type = "Text", nullable)]
  pub last_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
  pub fn into_job_info(self) -> JobInfo {
    let payload = match self.payload {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    JobInfo {
      id: self.id,
      job_type: self.job_type,
      payload,
      trace_id: self.trace_id,
      attempts: self.attempts.max(0) as u32,
      max_attempts: self.max_attempts.max(1) as u32,
      backoff: Backoff::from_parts(&self.backoff_kind, self.backoff_base_ms),
      status: self.state.into(),
      enqueued_at: self.enqueued_at.into(),
      process_at: self.process_at.into(),
      started_at: self.started_at.map(Into::into),
      lease_until: self.lease_until.map(Into::into),
      finished_at: self.finished_at.map(Into::into),
      failed_at: self.failed_at.map(Into::into),
      last_error: self.last_error,
    }
  }
}

/// 把作业信息转换为完整的 ActiveModel
/// Convert a job record into a fully set ActiveModel
pub fn active_model(job: &JobInfo) -> ActiveModel {
  ActiveModel {
    id: Set(job.id.clone()),
    job_type: Set(job.job_type.clone()),
    payload: Set(Value::Object(job.payload.clone())),
    trace_id: Set(job.trace_id.clone()),
    attempts: Set(job.attempts as i32),
    max_attempts: Set(job.max_attempts as i32),
    backoff_kind: Set(job.backoff.kind().to_string()),
    backoff_base_ms: Set(job.backoff.base().as_millis() as i64),
    state: Set(job.status.into()),
    carrier: Set(job.carrier()),
    enqueued_at: Set(job.enqueued_at.into()),
    process_at: Set(job.process_at.into()),
    started_at: Set(job.started_at.map(Into::into)),
    lease_until: Set(job.lease_until.map(Into::into)),
    finished_at: Set(job.finished_at.map(Into::into)),
    failed_at: Set(job.failed_at.map(Into::into)),
    last_error: Set(job.last_error.clone()),
  }
}
