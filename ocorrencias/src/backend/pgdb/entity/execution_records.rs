//! 执行记录实体
//! Execution record entity

use crate::model::ExecutionRecord;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "execution_records")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub job_id: Option<String>,
  pub schedule_id: Option<i64>,
  pub job_type: String,
  /// RUNNING | SUCCESS | ERROR
  pub status: String,
  pub attempt_number: i32,
  #[sea_orm(column_type = "JsonBinary")]
  pub request_payload: Json,
  #[sea_orm(column_type = "JsonBinary", nullable)]
  pub response_payload: Option<Json>,
  #[sea_orm(column_type = "Text", nullable)]
  pub error_message: Option<String>,
  pub trace_id: String,
  pub started_at: DateTimeWithTimeZone,
  pub finished_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
  pub fn into_record(self) -> crate::error::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
      id: self.id,
      job_id: self.job_id,
      schedule_id: self.schedule_id,
      job_type: self.job_type,
      status: self.status.parse()?,
      attempt_number: self.attempt_number.max(0) as u32,
      request_payload: self.request_payload,
      response_payload: self.response_payload,
      error_message: self.error_message,
      trace_id: self.trace_id,
      started_at: self.started_at.into(),
      finished_at: self.finished_at.map(Into::into),
    })
  }
}
