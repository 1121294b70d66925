//! 内存 Broker 实现
//! Memory Broker implementation

use crate::base::Broker;
use crate::error::{Error, Result};
use crate::inspector::DlqFilter;
use crate::job::{JobInfo, JobStatus};
use crate::model::RepeatableEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// 内存存储
/// Memory storage
#[derive(Default)]
struct MemoryStorage {
  /// 所有作业 - key: job_id
  /// All jobs - key: job_id
  jobs: HashMap<String, JobInfo>,
  /// 可出队的作业，按 (process_at, 入队序号) 排序
  /// Dequeueable jobs ordered by (process_at, enqueue sequence)
  ready: BTreeMap<(i64, u64), String>,
  /// 死信队列，按 (入队时间, 序号) 排序
  /// DLQ ordered by (enqueue time, sequence)
  dead: BTreeMap<(i64, u64), String>,
  repeatables: BTreeMap<String, RepeatableEntry>,
  seq: u64,
}

impl MemoryStorage {
  fn next_seq(&mut self) -> u64 {
    self.seq += 1;
    self.seq
  }

  fn push_ready(&mut self, job: &JobInfo) {
    Self::remove_index(&mut self.ready, &job.id);
    let seq = self.next_seq();
    self
      .ready
      .insert((job.process_at.timestamp_micros(), seq), job.id.clone());
  }

  fn remove_index(index: &mut BTreeMap<(i64, u64), String>, id: &str) {
    index.retain(|_, job_id| job_id != id);
  }

  fn job_mut(&mut self, id: &str) -> Result<&mut JobInfo> {
    self
      .jobs
      .get_mut(id)
      .ok_or_else(|| Error::JobNotFound { id: id.to_string() })
  }
}

/// 内存经纪人
/// Memory broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
  storage: Arc<RwLock<MemoryStorage>>,
}

impl MemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }

  /// 某状态下的作业数量
  /// Number of jobs in a state
  pub async fn count(&self, status: JobStatus) -> usize {
    let storage = self.storage.read().await;
    storage.jobs.values().filter(|j| j.status == status).count()
  }
}

#[async_trait]
impl Broker for MemoryBroker {
  async fn ping(&self) -> Result<()> {
    Ok(())
  }

  async fn enqueue(&self, job: JobInfo) -> Result<JobInfo> {
    let mut storage = self.storage.write().await;
    if storage.jobs.contains_key(&job.id) {
      return Err(Error::JobIdConflict);
    }
    storage.push_ready(&job);
    storage.jobs.insert(job.id.clone(), job.clone());
    Ok(job)
  }

  async fn dequeue(&self, job_types: &[String], lease: Duration) -> Result<Option<JobInfo>> {
    let now = Utc::now();
    let now_micros = now.timestamp_micros();
    let lease = chrono::Duration::from_std(lease).map_err(|e| Error::queue(e.to_string()))?;
    let mut storage = self.storage.write().await;

    let found = storage
      .ready
      .iter()
      .take_while(|((process_at, _), _)| *process_at <= now_micros)
      .find(|(_, id)| {
        storage
          .jobs
          .get(*id)
          .map(|job| {
            matches!(job.status, JobStatus::Waiting | JobStatus::Failed)
              && job_types.iter().any(|t| t == &job.job_type)
          })
          .unwrap_or(false)
      })
      .map(|(key, id)| (*key, id.clone()));

    let Some((key, id)) = found else {
      return Ok(None);
    };
    storage.ready.remove(&key);

    let job = storage.job_mut(&id)?;
    job.status = JobStatus::Active;
    job.attempts += 1;
    job.started_at = Some(now);
    job.lease_until = Some(now + lease);
    Ok(Some(job.clone()))
  }

  async fn list_lease_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobInfo>> {
    let storage = self.storage.read().await;
    let mut expired: Vec<JobInfo> = storage
      .jobs
      .values()
      .filter(|job| job.lease_expired(now))
      .cloned()
      .collect();
    expired.sort_by_key(|job| job.lease_until);
    Ok(expired)
  }

  async fn complete(&self, job: &JobInfo) -> Result<()> {
    let mut storage = self.storage.write().await;
    let stored = storage.job_mut(&job.id)?;
    stored.status = JobStatus::Completed;
    stored.lease_until = None;
    stored.finished_at = Some(Utc::now());
    MemoryStorage::remove_index(&mut storage.ready, &job.id);
    Ok(())
  }

  async fn retry(&self, job: &JobInfo, process_at: DateTime<Utc>, error_msg: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    let now = Utc::now();
    let stored = storage.job_mut(&job.id)?;
    stored.status = JobStatus::Failed;
    stored.lease_until = None;
    stored.process_at = process_at;
    stored.failed_at = Some(now);
    stored.last_error = Some(error_msg.to_string());
    let snapshot = stored.clone();
    storage.push_ready(&snapshot);
    Ok(())
  }

  async fn archive(&self, job: &JobInfo, error_msg: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    let now = Utc::now();
    let stored = storage.job_mut(&job.id)?;
    stored.status = JobStatus::Dead;
    stored.lease_until = None;
    stored.failed_at = Some(now);
    stored.finished_at = Some(now);
    stored.last_error = Some(error_msg.to_string());
    let enqueued = stored.enqueued_at.timestamp_micros();
    let id = stored.id.clone();
    MemoryStorage::remove_index(&mut storage.ready, &id);
    MemoryStorage::remove_index(&mut storage.dead, &id);
    let seq = storage.next_seq();
    storage.dead.insert((enqueued, seq), id);
    Ok(())
  }

  async fn get_job(&self, id: &str) -> Result<Option<JobInfo>> {
    let storage = self.storage.read().await;
    Ok(storage.jobs.get(id).cloned())
  }

  async fn list_archived(&self, filter: &DlqFilter) -> Result<Vec<JobInfo>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .dead
        .values()
        .filter_map(|id| storage.jobs.get(id))
        .filter(|job| filter.matches(job))
        .cloned()
        .collect(),
    )
  }

  async fn requeue_archived(&self, id: &str) -> Result<JobInfo> {
    let mut storage = self.storage.write().await;
    let is_dead = storage
      .jobs
      .get(id)
      .map(|j| j.status == JobStatus::Dead)
      .unwrap_or(false);
    if !is_dead {
      return Err(Error::JobNotFound { id: id.to_string() });
    }
    MemoryStorage::remove_index(&mut storage.dead, id);

    let now = Utc::now();
    let job = storage.job_mut(id)?;
    job.status = JobStatus::Waiting;
    job.attempts = 0;
    job.enqueued_at = now;
    job.process_at = now;
    job.started_at = None;
    job.lease_until = None;
    job.finished_at = None;
    job.failed_at = None;
    job.last_error = None;
    let snapshot = job.clone();
    storage.push_ready(&snapshot);
    Ok(snapshot)
  }

  async fn delete_completed_before(&self, before: DateTime<Utc>) -> Result<u64> {
    let mut storage = self.storage.write().await;
    let before_len = storage.jobs.len();
    storage.jobs.retain(|_, job| {
      !(job.status == JobStatus::Completed && job.finished_at.map(|f| f < before).unwrap_or(false))
    });
    Ok((before_len - storage.jobs.len()) as u64)
  }

  async fn register_repeatable(&self, entry: &RepeatableEntry) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage.repeatables.insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  async fn remove_repeatable(&self, key: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage.repeatables.remove(key);
    Ok(())
  }

  async fn list_repeatables(&self) -> Result<Vec<RepeatableEntry>> {
    let storage = self.storage.read().await;
    Ok(storage.repeatables.values().cloned().collect())
  }
}
