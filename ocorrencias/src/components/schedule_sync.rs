//! Schedule Sync 模块
//! Schedule Sync module
//!
//! 把激活的调度定义同步为队列后端的周期条目：
//! 新增或 cron 改变的调度被登记，不再激活的条目被移除
//!
//! Keeps the queue backend's repeatable entries in line with the active schedules:
//! new or re-timed schedules are registered, entries without an active schedule are removed

use crate::base::{Broker, Store};
use crate::components::ComponentLifecycle;
use crate::error::Result;
use crate::model::RepeatableEntry;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 同步配置
/// Sync configuration
#[derive(Debug, Clone)]
pub struct ScheduleSyncConfig {
  /// 同步间隔
  /// Sync interval
  pub sync_interval: Duration,
}

impl Default for ScheduleSyncConfig {
  fn default() -> Self {
    Self {
      sync_interval: Duration::from_secs(60),
    }
  }
}

/// 一次同步的结果
/// Result of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub added: Vec<String>,
  pub removed: Vec<String>,
}

pub struct ScheduleSync {
  store: Arc<dyn Store>,
  broker: Arc<dyn Broker>,
  config: ScheduleSyncConfig,
  done: Arc<AtomicBool>,
}

impl ScheduleSync {
  pub fn new(store: Arc<dyn Store>, broker: Arc<dyn Broker>, config: ScheduleSyncConfig) -> Self {
    Self {
      store,
      broker,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 计算差异并应用
  /// Compute the diff and apply it
  pub async fn sync(&self) -> Result<SyncReport> {
    let schedules = self.store.active_schedules().await?;
    let current: HashMap<String, RepeatableEntry> = self
      .broker
      .list_repeatables()
      .await?
      .into_iter()
      .map(|entry| (entry.key.clone(), entry))
      .collect();

    let now = Utc::now();
    let wanted: Vec<RepeatableEntry> = schedules
      .iter()
      .filter(|s| match s.schedule() {
        Ok(_) => true,
        Err(e) => {
          tracing::error!(schedule_id = s.id, error = %e, "Skipping schedule with invalid cron");
          false
        }
      })
      .map(|s| RepeatableEntry::for_schedule(s, now))
      .collect();
    let wanted_keys: HashSet<&str> = wanted.iter().map(|e| e.key.as_str()).collect();

    let mut report = SyncReport::default();

    for key in current.keys().filter(|k| !wanted_keys.contains(k.as_str())) {
      match self.broker.remove_repeatable(key).await {
        Ok(()) => {
          tracing::info!(key = %key, "ScheduleSync: removed repeatable");
          report.removed.push(key.clone());
        }
        Err(e) => tracing::error!(key = %key, error = %e, "Failed to remove repeatable"),
      }
    }

    for entry in wanted {
      let unchanged = current
        .get(&entry.key)
        .map(|existing| existing.cron_expression == entry.cron_expression)
        .unwrap_or(false);
      if unchanged {
        continue;
      }
      match self.broker.register_repeatable(&entry).await {
        Ok(()) => {
          tracing::info!(
            key = %entry.key,
            cron = %entry.cron_expression,
            "ScheduleSync: registered repeatable"
          );
          report.added.push(entry.key);
        }
        Err(e) => tracing::error!(key = %entry.key, error = %e, "Failed to register repeatable"),
      }
    }

    report.added.sort();
    report.removed.sort();
    Ok(report)
  }
}

impl ComponentLifecycle for ScheduleSync {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.sync_interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("ScheduleSync: shutting down");
          break;
        }

        if let Err(e) = self.sync().await {
          tracing::error!("ScheduleSync error: {}", e);
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
