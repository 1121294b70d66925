//! Recoverer 模块
//! Recoverer module
//!
//! 定期回收租约已过期的 `active` 作业（工作者崩溃或关闭超时留下的作业），
//! 按正常的失败路径重试或移入死信队列
//!
//! Periodically reclaims `active` jobs whose lease expired (left behind by a crashed worker or
//! a shutdown timeout) and sends them down the normal failure path: retry or DLQ

use crate::base::constants::DEFAULT_RECOVER_INTERVAL;
use crate::components::ComponentLifecycle;
use crate::error::Result;
use crate::queue::{FailOutcome, Queue};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 写入作业的错误信息
pub const LEASE_EXPIRED: &str = "lease expired";

/// Recoverer 配置
/// Recoverer configuration
#[derive(Debug, Clone)]
pub struct RecovererConfig {
  /// 扫描间隔
  /// Scan interval
  pub interval: Duration,
}

impl Default for RecovererConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_RECOVER_INTERVAL,
    }
  }
}

/// 一次回收的结果
/// Result of one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverReport {
  pub retried: usize,
  pub dead: usize,
}

/// Recoverer - 回收孤儿作业
/// Recoverer - reclaims orphaned jobs
pub struct Recoverer {
  queue: Queue,
  config: RecovererConfig,
  done: Arc<AtomicBool>,
}

impl Recoverer {
  pub fn new(queue: Queue, config: RecovererConfig) -> Self {
    Self {
      queue,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 执行一次回收
  /// Run one recovery pass
  pub async fn recover(&self) -> Result<RecoverReport> {
    let mut report = RecoverReport::default();
    let expired = self.queue.broker().list_lease_expired(Utc::now()).await?;
    for job in expired {
      tracing::warn!(
        job_id = %job.id,
        job_type = %job.job_type,
        trace_id = %job.trace_id,
        attempt = job.attempts,
        "Recoverer: lease expired on active job"
      );
      match self.queue.fail(&job, LEASE_EXPIRED).await {
        Ok(FailOutcome::Dead) => report.dead += 1,
        Ok(FailOutcome::Retrying { .. }) => report.retried += 1,
        Err(e) => tracing::warn!(job_id = %job.id, "Recoverer: could not reclaim job: {}", e),
      }
    }
    Ok(report)
  }
}

impl ComponentLifecycle for Recoverer {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("Recoverer: shutting down");
          break;
        }

        if let Err(e) = self.recover().await {
          tracing::error!("Recoverer error: {}", e);
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
  use crate::job::{JobOptions, JobStatus};
  use serde_json::json;

  fn queue(broker: Arc<MemoryBroker>) -> Queue {
    Queue::new(broker, ["run-agendamento"]).with_lease(Duration::from_millis(20))
  }

  #[tokio::test]
  async fn test_abandoned_job_is_retried_then_buried() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = queue(broker.clone());
    let recoverer = Recoverer::new(queue.clone(), RecovererConfig::default());
    let options = JobOptions::default()
      .with_attempts(2)
      .with_backoff_base(Duration::from_millis(1));
    let id = queue
      .enqueue("run-agendamento", json!({"schedule_id": 1}), options)
      .await
      .unwrap();

    // 取出后不确认，模拟崩溃的工作者
    let abandoned = queue.dequeue(&queue.job_types()).await.unwrap().unwrap();
    assert_eq!(abandoned.attempts, 1);
    assert_eq!(recoverer.recover().await.unwrap(), RecoverReport::default());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let report = recoverer.recover().await.unwrap();
    assert_eq!(report.retried, 1);
    let stored = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.last_error.as_deref(), Some(LEASE_EXPIRED));

    tokio::time::sleep(Duration::from_millis(5)).await;
    let again = queue.dequeue(&queue.job_types()).await.unwrap().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.attempts, 2);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(recoverer.recover().await.unwrap().dead, 1);
    assert_eq!(broker.count(JobStatus::Dead).await, 1);
    assert_eq!(broker.count(JobStatus::Active).await, 0);
  }

  #[tokio::test]
  async fn test_settled_jobs_are_left_alone() {
    let broker = Arc::new(MemoryBroker::new());
    let queue = queue(broker.clone());
    queue
      .enqueue("run-agendamento", json!({}), JobOptions::default())
      .await
      .unwrap();
    let job = queue.dequeue(&queue.job_types()).await.unwrap().unwrap();
    queue.ack(&job).await.unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    let recoverer = Recoverer::new(queue, RecovererConfig::default());
    assert_eq!(recoverer.recover().await.unwrap(), RecoverReport::default());
    assert_eq!(broker.count(JobStatus::Completed).await, 1);
  }
}
