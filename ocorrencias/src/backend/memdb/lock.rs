use crate::base::LockStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// 内存锁存储
/// In-memory lock store
#[derive(Clone, Default)]
pub struct MemoryLockStore {
  locks: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl MemoryLockStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前（未清理的）锁数量
  /// Number of locks not yet swept
  pub async fn len(&self) -> usize {
    self.locks.lock().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }
}

#[async_trait]
impl LockStore for MemoryLockStore {
  async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::other(e.to_string()))?;
    let mut locks = self.locks.lock().await;
    match locks.get(key) {
      Some(expires_at) if *expires_at > now => Ok(false),
      _ => {
        locks.insert(key.to_string(), now + ttl);
        Ok(true)
      }
    }
  }

  async fn sweep(&self) -> Result<u64> {
    let now = Utc::now();
    let mut locks = self.locks.lock().await;
    let before = locks.len();
    locks.retain(|_, expires_at| *expires_at >= now);
    Ok((before - locks.len()) as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_acquire_is_exclusive_until_expiry() {
    let store = MemoryLockStore::new();
    assert!(store
      .acquire("schedule:1:lock", Duration::from_millis(30))
      .await
      .unwrap());
    assert!(!store
      .acquire("schedule:1:lock", Duration::from_millis(30))
      .await
      .unwrap());
    assert!(store
      .acquire("schedule:2:lock", Duration::from_millis(30))
      .await
      .unwrap());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(store.sweep().await.unwrap(), 2);
    assert!(store.is_empty().await);
    assert!(store
      .acquire("schedule:1:lock", Duration::from_secs(60))
      .await
      .unwrap());
  }

  #[tokio::test]
  async fn test_expired_lock_is_reclaimable_before_sweep() {
    let store = MemoryLockStore::new();
    assert!(store.acquire("k", Duration::from_millis(1)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(store.acquire("k", Duration::from_secs(1)).await.unwrap());
  }
}
