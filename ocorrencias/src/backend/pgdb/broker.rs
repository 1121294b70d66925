//! PostgresSQL 队列实现
//! PostgresSQL queue implementation
//!
//! 出队在事务内使用 `FOR UPDATE SKIP LOCKED`，并发的工作者不会取到同一作业；
//! 死信队列就是 `state = 'dead'` 的行
//!
//! Dequeue runs `FOR UPDATE SKIP LOCKED` inside a transaction so concurrent workers never
//! take the same job; the DLQ is the set of rows with `state = 'dead'`

use crate::backend::pgdb::entity::jobs::{self, JobState};
use crate::backend::pgdb::entity::{repeatables, Jobs, Repeatables};
use crate::backend::pgdb::schema::init_schema;
use crate::base::Broker;
use crate::error::{Error, Result};
use crate::inspector::DlqFilter;
use crate::job::JobInfo;
use crate::model::RepeatableEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{LockBehavior, LockType, OnConflict};
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
  QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::time::Duration;

/// PostgresSQL 队列
/// PostgresSQL queue
#[derive(Clone)]
pub struct PostgresBroker {
  db: DatabaseConnection,
}

impl PostgresBroker {
  /// 连接数据库并初始化 schema
  /// Connect and initialize the schema
  pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
    let opt = ConnectOptions::new(database_url)
      .max_connections(max_connections)
      .to_owned();
    let db = Database::connect(opt).await?;
    init_schema(&db).await?;
    Ok(Self { db })
  }

  /// 从现有数据库连接创建
  /// Create from an existing database connection
  pub fn from_connection(db: DatabaseConnection) -> Self {
    Self { db }
  }

  pub fn db(&self) -> &DatabaseConnection {
    &self.db
  }

  async fn update_job<F>(&self, id: &str, apply: F) -> Result<jobs::Model>
  where
    F: FnOnce(&mut jobs::ActiveModel) + Send,
  {
    let model = Jobs::find_by_id(id.to_string())
      .one(&self.db)
      .await?
      .ok_or_else(|| Error::JobNotFound { id: id.to_string() })?;
    let mut active: jobs::ActiveModel = model.into();
    apply(&mut active);
    Ok(active.update(&self.db).await?)
  }
}

#[async_trait]
impl Broker for PostgresBroker {
  async fn ping(&self) -> Result<()> {
    self.db.ping().await?;
    Ok(())
  }

  async fn enqueue(&self, job: JobInfo) -> Result<JobInfo> {
    match Jobs::insert(jobs::active_model(&job)).exec(&self.db).await {
      Ok(_) => Ok(job),
      Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
        Err(Error::JobIdConflict)
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn dequeue(&self, job_types: &[String], lease: Duration) -> Result<Option<JobInfo>> {
    if job_types.is_empty() {
      return Ok(None);
    }
    let now = Utc::now();
    let lease = chrono::Duration::from_std(lease).map_err(|e| Error::queue(e.to_string()))?;
    let txn = self.db.begin().await?;

    let found = Jobs::find()
      .filter(jobs::Column::State.is_in([JobState::Waiting, JobState::Failed]))
      .filter(jobs::Column::JobType.is_in(job_types.iter().cloned()))
      .filter(jobs::Column::ProcessAt.lte(now))
      .order_by_asc(jobs::Column::ProcessAt)
      .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
      .one(&txn)
      .await?;

    let Some(model) = found else {
      txn.commit().await?;
      return Ok(None);
    };

    let attempts = model.attempts + 1;
    let mut active: jobs::ActiveModel = model.into();
    active.state = Set(JobState::Active);
    active.attempts = Set(attempts);
    active.started_at = Set(Some(now.into()));
    active.lease_until = Set(Some((now + lease).into()));
    let updated = active.update(&txn).await?;
    txn.commit().await?;

    Ok(Some(updated.into_job_info()))
  }

  async fn list_lease_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobInfo>> {
    let models = Jobs::find()
      .filter(jobs::Column::State.eq(JobState::Active))
      .filter(jobs::Column::LeaseUntil.lt(now))
      .order_by_asc(jobs::Column::LeaseUntil)
      .all(&self.db)
      .await?;
    Ok(models.into_iter().map(jobs::Model::into_job_info).collect())
  }

  async fn complete(&self, job: &JobInfo) -> Result<()> {
    let now = Utc::now();
    self
      .update_job(&job.id, |active| {
        active.state = Set(JobState::Completed);
        active.lease_until = Set(None);
        active.finished_at = Set(Some(now.into()));
      })
      .await?;
    Ok(())
  }

  async fn retry(&self, job: &JobInfo, process_at: DateTime<Utc>, error_msg: &str) -> Result<()> {
    let now = Utc::now();
    let error_msg = error_msg.to_string();
    self
      .update_job(&job.id, |active| {
        active.state = Set(JobState::Failed);
        active.lease_until = Set(None);
        active.process_at = Set(process_at.into());
        active.failed_at = Set(Some(now.into()));
        active.last_error = Set(Some(error_msg));
      })
      .await?;
    Ok(())
  }

  async fn archive(&self, job: &JobInfo, error_msg: &str) -> Result<()> {
    let now = Utc::now();
    let error_msg = error_msg.to_string();
    self
      .update_job(&job.id, |active| {
        active.state = Set(JobState::Dead);
        active.lease_until = Set(None);
        active.failed_at = Set(Some(now.into()));
        active.finished_at = Set(Some(now.into()));
        active.last_error = Set(Some(error_msg));
      })
      .await?;
    Ok(())
  }

  async fn get_job(&self, id: &str) -> Result<Option<JobInfo>> {
    Ok(
      Jobs::find_by_id(id.to_string())
        .one(&self.db)
        .await?
        .map(jobs::Model::into_job_info),
    )
  }

  async fn list_archived(&self, filter: &DlqFilter) -> Result<Vec<JobInfo>> {
    let mut query = Jobs::find().filter(jobs::Column::State.eq(JobState::Dead));
    if let Some(name) = &filter.name {
      query = query.filter(jobs::Column::JobType.eq(name.clone()));
    }
    if let Some(from) = filter.from {
      query = query.filter(jobs::Column::EnqueuedAt.gte(from));
    }
    if let Some(to) = filter.to {
      query = query.filter(jobs::Column::EnqueuedAt.lte(to));
    }
    if let Some(carrier) = &filter.carrier {
      query = query.filter(jobs::Column::Carrier.eq(carrier.clone()));
    }
    let models = query
      .order_by_asc(jobs::Column::EnqueuedAt)
      .all(&self.db)
      .await?;
    Ok(
      models
        .into_iter()
        .map(jobs::Model::into_job_info)
        .filter(|job| filter.matches(job))
        .collect(),
    )
  }

  async fn requeue_archived(&self, id: &str) -> Result<JobInfo> {
    let now = Utc::now();
    let txn = self.db.begin().await?;
    let model = Jobs::find_by_id(id.to_string())
      .filter(jobs::Column::State.eq(JobState::Dead))
      .lock_with_behavior(LockType::Update, LockBehavior::Nowait)
      .one(&txn)
      .await?
      .ok_or_else(|| Error::JobNotFound { id: id.to_string() })?;

    let mut active: jobs::ActiveModel = model.into();
    active.state = Set(JobState::Waiting);
    active.attempts = Set(0);
    active.enqueued_at = Set(now.into());
    active.process_at = Set(now.into());
    active.started_at = Set(None);
    active.lease_until = Set(None);
    active.finished_at = Set(None);
    active.failed_at = Set(None);
    active.last_error = Set(None);
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated.into_job_info())
  }

  async fn delete_completed_before(&self, before: DateTime<Utc>) -> Result<u64> {
    let result = Jobs::delete_many()
      .filter(jobs::Column::State.eq(JobState::Completed))
      .filter(jobs::Column::FinishedAt.lt(before))
      .exec(&self.db)
      .await?;
    Ok(result.rows_affected)
  }

  async fn register_repeatable(&self, entry: &RepeatableEntry) -> Result<()> {
    let model = repeatables::ActiveModel {
      key: Set(entry.key.clone()),
      schedule_id: Set(entry.schedule_id),
      cron_expression: Set(entry.cron_expression.clone()),
      registered_at: Set(entry.registered_at.into()),
    };
    Repeatables::insert(model)
      .on_conflict(
        OnConflict::column(repeatables::Column::Key)
          .update_columns([
            repeatables::Column::ScheduleId,
            repeatables::Column::CronExpression,
            repeatables::Column::RegisteredAt,
          ])
          .to_owned(),
      )
      .exec(&self.db)
      .await?;
    Ok(())
  }

  async fn remove_repeatable(&self, key: &str) -> Result<()> {
    Repeatables::delete_by_id(key.to_string())
      .exec(&self.db)
      .await?;
    Ok(())
  }

  async fn list_repeatables(&self) -> Result<Vec<RepeatableEntry>> {
    let models = Repeatables::find()
      .order_by_asc(repeatables::Column::Key)
      .all(&self.db)
      .await?;
    Ok(models.into_iter().map(Into::into).collect())
  }
}
