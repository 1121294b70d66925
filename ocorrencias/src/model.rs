//! 领域记录
//! Domain records
//!
//! 调度定义、执行记录、承运商代码映射、运单与事件（ocorrência）
//! Schedule definitions, execution records, carrier code mappings, shipments and occurrences

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// 解析 cron 表达式，五字段的 crontab 会补上秒字段
/// Parse a cron expression; five-field crontab gets a seconds field prepended
pub fn parse_cron(expression: &str) -> Result<Schedule> {
  let trimmed = expression.trim();
  let normalized = if trimmed.split_whitespace().count() == 5 {
    format!("0 {trimmed}")
  } else {
    trimmed.to_string()
  };
  Schedule::from_str(&normalized).map_err(|e| Error::InvalidCron {
    expression: expression.to_string(),
    reason: e.to_string(),
  })
}

fn default_method() -> String {
  "GET".to_string()
}

/// 调度的 HTTP 目标
/// HTTP target of a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpTarget {
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub payload: Option<Value>,
}

impl HttpTarget {
  pub fn get<S: Into<String>>(url: S) -> Self {
    Self {
      url: url.into(),
      method: default_method(),
      headers: BTreeMap::new(),
      payload: None,
    }
  }

  pub fn post<S: Into<String>>(url: S, payload: Value) -> Self {
    Self {
      url: url.into(),
      method: "POST".to_string(),
      headers: BTreeMap::new(),
      payload: Some(payload),
    }
  }
}

/// 调度定义（agendamento）
/// Schedule definition (agendamento)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
  /// 新建时为 0
  /// Zero for a definition not yet stored
  pub id: i64,
  pub name: String,
  pub cron_expression: String,
  pub target: HttpTarget,
  pub window_minutes: i64,
  /// 拉取结果所属的承运商
  /// Carrier whose events the target returns
  pub carrier_id: Option<String>,
  pub active: bool,
}

impl ScheduleDefinition {
  /// 每个窗口的锁键
  /// Per-window lock key
  pub fn lock_key(&self) -> String {
    format!("schedule:{}:lock", self.id)
  }

  /// 队列后端中对应的周期条目键
  /// Key of the matching repeatable entry in the queue backend
  pub fn repeatable_key(&self) -> String {
    format!("schedule:{}", self.id)
  }

  pub fn schedule(&self) -> Result<Schedule> {
    parse_cron(&self.cron_expression)
  }

  /// 激活前 cron 必须合法
  /// An active definition must carry a valid cron expression
  pub fn validate(&self) -> Result<()> {
    if self.active {
      self.schedule()?;
    }
    if self.target.url.trim().is_empty() {
      return Err(Error::config(format!("schedule {} has no target url", self.id)));
    }
    Ok(())
  }

  /// `(from, to]` 内最早的触发点
  /// Earliest fire time inside `(from, to]`
  pub fn fire_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = self.schedule()?;
    Ok(schedule.after(&from).next().filter(|next| *next <= to))
  }

  /// 锁的存活时间，非正窗口回落到默认值
  /// Lock lifetime; non-positive windows fall back to the default
  pub fn lock_ttl(&self, default_minutes: i64) -> Duration {
    let minutes = if self.window_minutes > 0 {
      self.window_minutes
    } else {
      default_minutes.max(1)
    };
    Duration::from_secs(minutes as u64 * 60)
  }
}

/// 队列后端登记的周期条目
/// Repeatable entry registered in the queue backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatableEntry {
  pub key: String,
  pub schedule_id: i64,
  pub cron_expression: String,
  pub registered_at: DateTime<Utc>,
}

impl RepeatableEntry {
  pub fn for_schedule(schedule: &ScheduleDefinition, now: DateTime<Utc>) -> Self {
    Self {
      key: schedule.repeatable_key(),
      schedule_id: schedule.id,
      cron_expression: schedule.cron_expression.clone(),
      registered_at: now,
    }
  }
}

/// 执行状态
/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
  Running,
  Success,
  Error,
}

impl ExecutionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::Running => "RUNNING",
      ExecutionStatus::Success => "SUCCESS",
      ExecutionStatus::Error => "ERROR",
    }
  }
}

impl FromStr for ExecutionStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "RUNNING" => Ok(ExecutionStatus::Running),
      "SUCCESS" => Ok(ExecutionStatus::Success),
      "ERROR" => Ok(ExecutionStatus::Error),
      other => Err(Error::other(format!("unknown execution status: {other}"))),
    }
  }
}

/// 新的执行记录
/// New execution record
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
  pub job_id: Option<String>,
  pub schedule_id: Option<i64>,
  pub job_type: String,
  pub attempt_number: u32,
  pub request_payload: Value,
  pub trace_id: String,
}

/// 执行记录，只追加或更新，从不删除
/// Execution record; appended or updated, never deleted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
  pub id: i64,
  pub job_id: Option<String>,
  pub schedule_id: Option<i64>,
  pub job_type: String,
  pub status: ExecutionStatus,
  pub attempt_number: u32,
  pub request_payload: Value,
  pub response_payload: Option<Value>,
  pub error_message: Option<String>,
  pub trace_id: String,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// 承运商代码映射
/// Carrier code mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierCodeMapping {
  pub id: i64,
  pub carrier_id: String,
  pub external_code: String,
  pub internal_occurrence_code: String,
  pub normalized_status: String,
  pub active: bool,
}

impl CarrierCodeMapping {
  pub fn new(
    carrier_id: impl Into<String>,
    external_code: impl Into<String>,
    internal_occurrence_code: impl Into<String>,
    normalized_status: impl Into<String>,
  ) -> Self {
    Self {
      id: 0,
      carrier_id: carrier_id.into(),
      external_code: external_code.into(),
      internal_occurrence_code: internal_occurrence_code.into(),
      normalized_status: normalized_status.into(),
      active: true,
    }
  }
}

/// 运单
/// Shipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
  pub id: i64,
  /// 发票键（chave NF）
  /// Invoice key (chave NF)
  pub invoice_key: String,
  pub carrier_id: Option<String>,
  pub current_status: Option<String>,
}

impl Shipment {
  pub fn new(invoice_key: impl Into<String>) -> Self {
    Self {
      id: 0,
      invoice_key: invoice_key.into(),
      carrier_id: None,
      current_status: None,
    }
  }
}

/// 待写入的事件
/// Occurrence about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewOccurrence {
  pub shipment_id: i64,
  pub carrier_id: String,
  pub external_code: String,
  pub internal_occurrence_code: Option<String>,
  pub normalized_status: String,
  pub description: Option<String>,
  pub occurred_at: DateTime<Utc>,
  pub raw_payload: Value,
  /// 幂等键
  /// Idempotency key
  pub dedup_key: String,
  pub trace_id: String,
}

/// 事件记录，创建后不可变
/// Occurrence row, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
  pub id: i64,
  pub shipment_id: i64,
  pub carrier_id: String,
  pub external_code: String,
  pub internal_occurrence_code: Option<String>,
  pub normalized_status: String,
  pub description: Option<String>,
  pub occurred_at: DateTime<Utc>,
  pub raw_payload: Value,
  pub dedup_key: String,
  pub trace_id: String,
  pub processed_at: DateTime<Utc>,
}

impl Occurrence {
  pub fn from_new(id: i64, new: NewOccurrence, processed_at: DateTime<Utc>) -> Self {
    Self {
      id,
      shipment_id: new.shipment_id,
      carrier_id: new.carrier_id,
      external_code: new.external_code,
      internal_occurrence_code: new.internal_occurrence_code,
      normalized_status: new.normalized_status,
      description: new.description,
      occurred_at: new.occurred_at,
      raw_payload: new.raw_payload,
      dedup_key: new.dedup_key,
      trace_id: new.trace_id,
      processed_at,
    }
  }
}

/// 幂等插入的结果
/// Outcome of an idempotent insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
  Inserted(Occurrence),
  /// 同一幂等键已存在
  /// A row with the same idempotency key already existed
  Duplicate(Occurrence),
}

impl InsertOutcome {
  pub fn occurrence(&self) -> &Occurrence {
    match self {
      InsertOutcome::Inserted(o) | InsertOutcome::Duplicate(o) => o,
    }
  }

  pub fn is_inserted(&self) -> bool {
    matches!(self, InsertOutcome::Inserted(_))
  }
}

/// 新的管理错误
/// New administrative error entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewAdminError {
  pub codigo: String,
  pub mensagem: String,
  pub contexto: Value,
  pub trace_id: Option<String>,
}

/// 管理错误，供运维人员处理
/// Administrative error entry for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminError {
  pub id: i64,
  pub codigo: String,
  pub mensagem: String,
  pub contexto: Value,
  pub trace_id: Option<String>,
  pub created_at: DateTime<Utc>,
}
