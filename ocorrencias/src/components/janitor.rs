//! Janitor 模块
//! Janitor module
//!
//! 定期删除保留期之前完成的作业；死信队列中的作业不受影响
//! Periodically deletes jobs completed before the retention window; DLQ jobs are left alone

use crate::base::Broker;
use crate::components::ComponentLifecycle;
use crate::error::{Error, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Janitor 配置
/// Janitor configuration
#[derive(Debug, Clone)]
pub struct JanitorConfig {
  /// 清理间隔
  /// Cleanup interval
  pub interval: Duration,
  /// 已完成作业的保留时长
  /// How long completed jobs are kept
  pub retention: Duration,
}

impl Default for JanitorConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(300),
      retention: Duration::from_secs(24 * 3600),
    }
  }
}

pub struct Janitor {
  broker: Arc<dyn Broker>,
  config: JanitorConfig,
  done: Arc<AtomicBool>,
}

impl Janitor {
  pub fn new(broker: Arc<dyn Broker>, config: JanitorConfig) -> Self {
    Self {
      broker,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 执行一次清理，返回删除数量
  /// Run one cleanup pass, returning how many jobs were deleted
  pub async fn cleanup(&self) -> Result<u64> {
    let retention =
      chrono::Duration::from_std(self.config.retention).map_err(|e| Error::config(e.to_string()))?;
    let deleted = self
      .broker
      .delete_completed_before(Utc::now() - retention)
      .await?;
    if deleted > 0 {
      tracing::info!(deleted, "Janitor: removed expired completed jobs");
    }
    Ok(deleted)
  }
}

impl ComponentLifecycle for Janitor {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("Janitor: shutting down");
          break;
        }

        if let Err(e) = self.cleanup().await {
          tracing::error!("Janitor cleanup error: {}", e);
        }
      }
    })
  }

  fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memdb::MemoryBroker;
  use crate::job::{Job, JobInfo, JobOptions, JobStatus};
  use serde_json::json;

  #[tokio::test]
  async fn test_cleanup_keeps_recent_and_dead_jobs() {
    let broker = Arc::new(MemoryBroker::new());
    for _ in 0..2 {
      let job = Job::new("run-agendamento", json!({}))
        .unwrap()
        .with_options(JobOptions::default().with_attempts(1));
      broker
        .enqueue(JobInfo::from_job(&job, Utc::now()))
        .await
        .unwrap();
    }
    let types = vec!["run-agendamento".to_string()];
    let first = broker.dequeue(&types, Duration::from_secs(60)).await.unwrap().unwrap();
    broker.complete(&first).await.unwrap();
    let second = broker.dequeue(&types, Duration::from_secs(60)).await.unwrap().unwrap();
    broker.archive(&second, "boom").await.unwrap();

    let janitor = Janitor::new(
      broker.clone(),
      JanitorConfig {
        interval: Duration::from_secs(1),
        retention: Duration::from_secs(3600),
      },
    );
    assert_eq!(janitor.cleanup().await.unwrap(), 0);

    let janitor = Janitor::new(
      broker.clone(),
      JanitorConfig {
        interval: Duration::from_secs(1),
        retention: Duration::ZERO,
      },
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(janitor.cleanup().await.unwrap(), 1);
    assert_eq!(broker.count(JobStatus::Completed).await, 0);
    assert_eq!(broker.count(JobStatus::Dead).await, 1);
  }

  #[tokio::test]
  async fn test_janitor_shutdown() {
    let janitor = Janitor::new(Arc::new(MemoryBroker::new()), JanitorConfig::default());
    assert!(!janitor.is_done());
    janitor.shutdown();
    assert!(janitor.is_done());
  }
}
