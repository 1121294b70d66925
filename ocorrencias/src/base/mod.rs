//! 基础模块
//! Base module
//!
//! 定义队列后端、锁存储与数据存储的抽象
//! Defines the abstractions over the queue backend, the lock store and the data store

pub mod constants;

use crate::error::Result;
use crate::inspector::DlqFilter;
use crate::job::JobInfo;
use crate::model::{
  AdminError, CarrierCodeMapping, ExecutionRecord, ExecutionStatus, InsertOutcome, NewAdminError,
  NewExecution, NewOccurrence, Occurrence, RepeatableEntry, ScheduleDefinition, Shipment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// 队列后端
/// Queue backend
///
/// 至少一次投递：作业在确认或失败前保持 `active`，租约过期后可被回收
/// At-least-once delivery: a job stays `active` until acked or failed, and may be reclaimed
/// once its lease expires
#[async_trait]
pub trait Broker: Send + Sync {
  /// 测试连接
  /// Ping the backend
  async fn ping(&self) -> Result<()>;

  /// 存入一条等待中的作业
  /// Store a waiting job
  async fn enqueue(&self, job: JobInfo) -> Result<JobInfo>;

  /// 取出一条到期作业，标记为 `active`、增加尝试次数并设置 `lease` 时长的租约
  /// Take one due job, mark it `active`, bump its attempt count and lease it for `lease`
  async fn dequeue(&self, job_types: &[String], lease: Duration) -> Result<Option<JobInfo>>;

  /// 租约在 `now` 之前过期的 `active` 作业
  /// `active` jobs whose lease expired before `now`
  async fn list_lease_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobInfo>>;

  /// 标记作业完成
  /// Mark a job completed
  async fn complete(&self, job: &JobInfo) -> Result<()>;

  /// 作业失败，在 `process_at` 之后重试
  /// Failed job, retry after `process_at`
  async fn retry(&self, job: &JobInfo, process_at: DateTime<Utc>, error_msg: &str) -> Result<()>;

  /// 原样移入死信队列，保留 trace_id 与最后的错误
  /// Move verbatim into the DLQ, keeping trace_id and the last error
  async fn archive(&self, job: &JobInfo, error_msg: &str) -> Result<()>;

  /// 读取作业
  /// Read a job
  async fn get_job(&self, id: &str) -> Result<Option<JobInfo>>;

  /// 死信队列查询
  /// DLQ query
  async fn list_archived(&self, filter: &DlqFilter) -> Result<Vec<JobInfo>>;

  /// 从死信队列移除并重新入队
  /// Remove from the DLQ and enqueue again
  async fn requeue_archived(&self, id: &str) -> Result<JobInfo>;

  /// 删除早于 `before` 完成的作业
  /// Delete jobs completed before `before`
  async fn delete_completed_before(&self, before: DateTime<Utc>) -> Result<u64>;

  async fn register_repeatable(&self, entry: &RepeatableEntry) -> Result<()>;

  async fn remove_repeatable(&self, key: &str) -> Result<()>;

  async fn list_repeatables(&self) -> Result<Vec<RepeatableEntry>>;
}

/// 带 TTL 的互斥租约
/// Mutual-exclusion leases with TTL
///
/// 不提供释放操作，锁在 TTL 之后自行失效
/// There is no release; a lock lapses after its TTL
#[async_trait]
pub trait LockStore: Send + Sync {
  /// 原子的“不存在则插入”，已过期的行可被接管
  /// Atomic insert-if-absent; an expired row may be taken over
  async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

  /// 删除过期的锁，返回删除数量
  /// Delete expired locks, returning how many were removed
  async fn sweep(&self) -> Result<u64>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
  async fn active_schedules(&self) -> Result<Vec<ScheduleDefinition>>;

  async fn get_schedule(&self, id: i64) -> Result<Option<ScheduleDefinition>>;

  /// `id == 0` 时新建；激活的定义必须通过校验
  /// Creates when `id == 0`; an active definition must validate
  async fn save_schedule(&self, schedule: ScheduleDefinition) -> Result<ScheduleDefinition>;
}

#[async_trait]
pub trait MappingStore: Send + Sync {
  /// 查找激活的映射
  /// Find the active mapping
  async fn find_mapping(
    &self,
    carrier_id: &str,
    external_code: &str,
  ) -> Result<Option<CarrierCodeMapping>>;

  /// 保存映射；同一 (carrier_id, external_code) 的其他激活行会被停用
  /// Save a mapping; other active rows for the same (carrier_id, external_code) are deactivated
  async fn save_mapping(&self, mapping: CarrierCodeMapping) -> Result<CarrierCodeMapping>;
}

#[async_trait]
pub trait ShipmentStore: Send + Sync {
  async fn find_shipment_by_invoice_key(&self, invoice_key: &str) -> Result<Option<Shipment>>;

  async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>>;

  async fn save_shipment(&self, shipment: Shipment) -> Result<Shipment>;

  async fn set_current_status(&self, shipment_id: i64, status: &str) -> Result<()>;
}

#[async_trait]
pub trait OccurrenceStore: Send + Sync {
  /// 按 `dedup_key` 幂等插入
  /// Idempotent insert keyed by `dedup_key`
  async fn insert_occurrence(&self, occurrence: NewOccurrence) -> Result<InsertOutcome>;

  /// Occurrence already stored under `dedup_key`
  async fn find_occurrence_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Occurrence>>;

  /// `occurred_at` 最大的事件，相同时取最大 id
  /// Occurrence with the greatest `occurred_at`, highest id on ties
  async fn latest_occurrence(&self, shipment_id: i64) -> Result<Option<Occurrence>>;

  async fn list_occurrences(&self, shipment_id: i64) -> Result<Vec<Occurrence>>;
}

#[async_trait]
pub trait AdminErrorLog: Send + Sync {
  async fn record_admin_error(&self, error: NewAdminError) -> Result<AdminError>;

  async fn list_admin_errors(&self, codigo: Option<&str>) -> Result<Vec<AdminError>>;
}

#[async_trait]
pub trait ExecutionLog: Send + Sync {
  async fn start_execution(&self, execution: NewExecution) -> Result<ExecutionRecord>;

  async fn finish_execution(
    &self,
    id: i64,
    status: ExecutionStatus,
    response_payload: Option<Value>,
    error_message: Option<String>,
  ) -> Result<()>;

  async fn list_executions(&self, job_id: &str) -> Result<Vec<ExecutionRecord>>;
}

/// 数据存储的全部能力
/// Every data store capability in one bound
pub trait Store:
  ScheduleStore + MappingStore + ShipmentStore + OccurrenceStore + AdminErrorLog + ExecutionLog
{
}

impl<T> Store for T where
  T: ScheduleStore + MappingStore + ShipmentStore + OccurrenceStore + AdminErrorLog + ExecutionLog
{
}
