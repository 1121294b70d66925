//! 后端模块
//! Backend module
//!
//! 队列、锁与数据存储的具体实现：
//! Concrete implementations of the queue, the locks and the data store:
//!
//! - `memdb`: 进程内实现，用于测试和单进程运行
//!   - in-process implementation for tests and single-process runs
//! - `pgdb`: PostgresSQL 实现，作业、锁与业务数据都在同一个库中
//!   - PostgresSQL implementation, jobs, locks and domain data share one database
//! - `rdb`: 可选的 Redis 锁存储
//!   - optional Redis lock store

pub mod memdb;
pub mod pgdb;
pub mod rdb;

use crate::base::{Broker, LockStore, Store};
use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;

/// 一组已连接的后端
/// A set of connected backends
#[derive(Clone)]
pub struct Backend {
  pub broker: Arc<dyn Broker>,
  pub locks: Arc<dyn LockStore>,
  pub store: Arc<dyn Store>,
}

impl Backend {
  /// 全内存后端
  /// All-in-memory backend
  pub fn memory() -> Self {
    Self {
      broker: Arc::new(memdb::MemoryBroker::new()),
      locks: Arc::new(memdb::MemoryLockStore::new()),
      store: Arc::new(memdb::MemoryStore::new()),
    }
  }

  /// 按配置连接后端
  /// Connect the backends described by the configuration
  ///
  /// 设置了 `REDIS_URL` 时锁存放在 Redis，否则与数据放在一起
  /// With `REDIS_URL` set the locks live in Redis, otherwise next to the data
  pub async fn connect(config: &Config, job_types: &[String]) -> Result<Self> {
    let mut backend = match config.backend {
      BackendKind::Memory => Self::memory(),
      BackendKind::Postgres => {
        let url = config
          .database_url
          .as_deref()
          .ok_or_else(|| Error::config("DATABASE_URL is required for the postgres backend"))?;
        let max_connections = config.max_connections(job_types);
        let opt = ConnectOptions::new(url)
          .max_connections(max_connections)
          .sqlx_logging(false)
          .to_owned();
        let db = Database::connect(opt).await?;
        pgdb::init_schema(&db).await?;
        tracing::info!(max_connections, "Connected to PostgresSQL");
        Self {
          broker: Arc::new(pgdb::PostgresBroker::from_connection(db.clone())),
          locks: Arc::new(pgdb::PostgresLockStore::new(db.clone())),
          store: Arc::new(pgdb::PostgresStore::new(db)),
        }
      }
    };

    if let Some(redis_url) = &config.redis_url {
      backend.locks = Arc::new(rdb::RedisLockStore::new(redis_url).await?);
      tracing::info!("Using Redis for schedule locks");
    }
    Ok(backend)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::base::ScheduleStore;
  use std::time::Duration;

  #[tokio::test]
  async fn test_connect_memory_backend() {
    let config = Config::new().backend(BackendKind::Memory);
    let backend = Backend::connect(&config, &[]).await.unwrap();
    backend.broker.ping().await.unwrap();
    assert!(backend
      .locks
      .acquire("schedule:1:lock", Duration::from_secs(60))
      .await
      .unwrap());
    assert!(backend.store.active_schedules().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_connect_postgres_requires_url() {
    let config = Config::new().backend(BackendKind::Postgres);
    assert!(Backend::connect(&config, &[]).await.is_err());
  }
}
