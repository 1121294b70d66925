//! PostgresSQL 锁存储
//! PostgresSQL lock store

use crate::backend::pgdb::entity::{locks, Locks};
use crate::base::LockStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
  ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Statement,
};
use std::time::Duration;

/// 一条语句完成插入或接管过期行，行数为 1 即获得锁
/// One statement inserts or takes over an expired row; one affected row means acquired
const ACQUIRE_SQL: &str = r#"
  INSERT INTO locks (key, expires_at) VALUES ($1, $2)
  ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at
  WHERE locks.expires_at < $3
"#;

#[derive(Clone)]
pub struct PostgresLockStore {
  db: DatabaseConnection,
}

impl PostgresLockStore {
  pub fn new(db: DatabaseConnection) -> Self {
    Self { db }
  }
}

#[async_trait]
impl LockStore for PostgresLockStore {
  async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::other(e.to_string()))?;
    let stmt = Statement::from_sql_and_values(
      self.db.get_database_backend(),
      ACQUIRE_SQL,
      [key.into(), (now + ttl).into(), now.into()],
    );
    let result = self.db.execute(stmt).await?;
    Ok(result.rows_affected() == 1)
  }

  async fn sweep(&self) -> Result<u64> {
    let result = Locks::delete_many()
      .filter(locks::Column::ExpiresAt.lt(Utc::now()))
      .exec(&self.db)
      .await?;
    Ok(result.rows_affected)
  }
}
