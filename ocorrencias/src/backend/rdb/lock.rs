//! Redis 锁存储
//! Redis lock store

use crate::base::LockStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;

/// 基于 `SET NX PX` 的锁
/// Lock built on `SET NX PX`
///
/// Redis 自己让键过期，所以 `sweep` 不需要做任何事
/// Redis expires the keys itself, so `sweep` has nothing to do
#[derive(Clone)]
pub struct RedisLockStore {
  conn: ConnectionManager,
}

impl RedisLockStore {
  /// 连接 Redis
  /// Connect to Redis
  pub async fn new(url: &str) -> Result<Self> {
    let client = Client::open(url)?;
    let conn = ConnectionManager::new(client).await?;
    Ok(Self { conn })
  }

  pub fn from_connection(conn: ConnectionManager) -> Self {
    Self { conn }
  }
}

#[async_trait]
impl LockStore for RedisLockStore {
  async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
    let mut conn = self.conn.clone();
    let ttl_ms = ttl.as_millis().max(1) as u64;
    let expires_at = Utc::now().timestamp_millis() + ttl_ms as i64;
    let reply: Option<String> = redis::cmd("SET")
      .arg(key)
      .arg(expires_at)
      .arg("NX")
      .arg("PX")
      .arg(ttl_ms)
      .query_async(&mut conn)
      .await?;
    Ok(reply.is_some())
  }

  async fn sweep(&self) -> Result<u64> {
    Ok(0)
  }
}
