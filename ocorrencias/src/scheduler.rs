//! 调度器模块
//! Scheduler module
//!
//! 每个节拍：先清理过期锁，然后对每个到期的激活调度尝试
//! `acquire("schedule:{id}:lock", window_minutes)`，拿到锁才入队一个分发作业。
//! 多个调度器实例并发运行时，同一窗口只会有一个实例入队。
//!
//! Every tick: sweep expired locks, then for each due active schedule attempt
//! `acquire("schedule:{id}:lock", window_minutes)` and enqueue one dispatch job only when the
//! lock was won. With several scheduler instances running, one window yields one enqueue.
//!
//! 评估窗口按节拍网格对齐：`(floor(now) - tick, floor(now)]`，与节拍触发的抖动无关，
//! 每个触发点只落在一个窗口内；同一实例对同一窗口只评估一次
//!
//! The evaluated window is aligned to the tick grid, `(floor(now) - tick, floor(now)]`, so
//! jitter in when a tick actually runs never moves a fire time into two windows; an instance
//! evaluates each window once
//!
//! 读取调度、拿锁或入队失败只记录日志，节拍继续处理下一个调度
//! Failures to read schedules, take a lock or enqueue are logged and the tick moves on

use crate::base::constants::JOB_RUN_AGENDAMENTO;
use crate::base::{LockStore, Store};
use crate::components::ComponentLifecycle;
use crate::error::Result;
use crate::job::{generate_trace_id, Job, JobOptions};
use crate::model::ScheduleDefinition;
use crate::queue::Queue;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 调度器配置
/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// 节拍间隔
  /// Tick interval
  pub tick_interval: Duration,
  /// 调度未设置窗口时的锁时长（分钟）
  /// Lock lifetime in minutes when a schedule has no window
  pub default_window_minutes: i64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      tick_interval: crate::base::constants::DEFAULT_TICK_INTERVAL,
      default_window_minutes: 1,
    }
  }
}

/// 一个节拍的结果
/// Result of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
  pub swept: u64,
  /// (schedule_id, job_id)
  pub enqueued: Vec<(i64, String)>,
  /// 锁已被其他实例持有
  /// Lock already held by another instance
  pub skipped: Vec<i64>,
  pub not_due: Vec<i64>,
  pub failed: Vec<i64>,
}

/// 包含 `now` 的节拍对应的评估窗口 `(from, to]`
/// Evaluation window `(from, to]` for the tick slot containing `now`
pub fn tick_window(now: DateTime<Utc>, tick: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
  let tick_ms = (tick.as_millis() as i64).max(1);
  let end_ms = now.timestamp_millis().div_euclid(tick_ms) * tick_ms;
  let to = DateTime::from_timestamp_millis(end_ms).unwrap_or(now);
  (to - chrono::Duration::milliseconds(tick_ms), to)
}

/// 为调度构造分发作业
/// Build the dispatch job for a schedule
///
/// 负载带上目标快照与追踪信息，定时触发与手动触发共用
/// The payload carries a target snapshot and trace context; shared by ticks and manual runs
pub fn dispatch_job(
  schedule: &ScheduleDefinition,
  trace_id: &str,
  window_start: DateTime<Utc>,
  options: JobOptions,
) -> Result<Job> {
  let payload = json!({
    "schedule_id": schedule.id,
    "agendamento": schedule.name,
    "transportadora_id": schedule.carrier_id,
    "target": schedule.target,
    "trace_id": trace_id,
    "window_start": window_start.to_rfc3339(),
  });
  Ok(Job::new(JOB_RUN_AGENDAMENTO, payload)?.with_options(options.with_trace_id(trace_id)))
}

pub struct Scheduler {
  /// 调度器唯一 id
  id: String,
  store: Arc<dyn Store>,
  locks: Arc<dyn LockStore>,
  queue: Queue,
  config: SchedulerConfig,
  /// 上一个已评估窗口的结束时间（毫秒）
  last_window_end: AtomicI64,
  done: Arc<AtomicBool>,
}

impl Scheduler {
  pub fn new(
    store: Arc<dyn Store>,
    locks: Arc<dyn LockStore>,
    queue: Queue,
    config: SchedulerConfig,
  ) -> Self {
    let id = format!(
      "{}:{}:{}",
      hostname::get().unwrap_or_default().to_string_lossy(),
      std::process::id(),
      Uuid::new_v4()
    );
    Self {
      id,
      store,
      locks,
      queue,
      config,
      last_window_end: AtomicI64::new(i64::MIN),
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub async fn tick(&self) -> TickReport {
    self.tick_at(Utc::now()).await
  }

  /// 以给定时间执行一个节拍
  /// Run one tick as of `now`
  pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
    let mut report = TickReport::default();

    match self.locks.sweep().await {
      Ok(swept) => report.swept = swept,
      Err(e) => tracing::error!(scheduler_id = %self.id, error = %e, "Lock sweep failed"),
    }

    let schedules = match self.store.active_schedules().await {
      Ok(schedules) => schedules,
      Err(e) => {
        tracing::error!(scheduler_id = %self.id, error = %e, "Failed to read schedules");
        return report;
      }
    };

    let (from, to) = tick_window(now, self.config.tick_interval);
    let already_evaluated =
      self.last_window_end.fetch_max(to.timestamp_millis(), Ordering::SeqCst) >= to.timestamp_millis();

    for schedule in schedules {
      let fire_at = match schedule.fire_between(from, to) {
        Ok(Some(fire_at)) if !already_evaluated => fire_at,
        Ok(_) => {
          report.not_due.push(schedule.id);
          continue;
        }
        Err(e) => {
          tracing::error!(schedule_id = schedule.id, error = %e, "Invalid cron on active schedule");
          report.failed.push(schedule.id);
          continue;
        }
      };

      let ttl = schedule.lock_ttl(self.config.default_window_minutes);
      match self.locks.acquire(&schedule.lock_key(), ttl).await {
        Ok(true) => {}
        Ok(false) => {
          tracing::debug!(schedule_id = schedule.id, "Window already claimed");
          report.skipped.push(schedule.id);
          continue;
        }
        Err(e) => {
          tracing::error!(schedule_id = schedule.id, error = %e, "Lock acquire failed");
          report.failed.push(schedule.id);
          continue;
        }
      }

      match self.enqueue_dispatch(&schedule, fire_at).await {
        Ok(job_id) => report.enqueued.push((schedule.id, job_id)),
        Err(e) => {
          tracing::error!(schedule_id = schedule.id, error = %e, "Failed to enqueue dispatch job");
          report.failed.push(schedule.id);
        }
      }
    }

    report
  }

  async fn enqueue_dispatch(
    &self,
    schedule: &ScheduleDefinition,
    fire_at: DateTime<Utc>,
  ) -> Result<String> {
    let trace_id = generate_trace_id();
    let mut job = dispatch_job(schedule, &trace_id, fire_at, self.queue.default_options())?;
    job
      .payload
      .insert("scheduler_id".to_string(), json!(self.id));
    let info = self.queue.enqueue_job(job).await?;
    tracing::info!(
      schedule_id = schedule.id,
      job_id = %info.id,
      trace_id = %trace_id,
      "Dispatch job enqueued"
    );
    Ok(info.id)
  }
}

impl ComponentLifecycle for Scheduler {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.tick_interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!(scheduler_id = %self.id, "Scheduler: shutting down");
          break;
        }

        let report = self.tick().await;
        tracing::debug!(
          swept = report.swept,
          enqueued = report.enqueued.len(),
          skipped = report.skipped.len(),
          failed = report.failed.len(),
          "Scheduler tick finished"
        );
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
  use crate::backend::memdb::{MemoryBroker, MemoryLockStore, MemoryStore};
  use crate::base::ScheduleStore;
  use crate::model::HttpTarget;
  use chrono::TimeZone;

  fn schedule(cron: &str) -> ScheduleDefinition {
    ScheduleDefinition {
      id: 0,
      name: "coleta".to_string(),
      cron_expression: cron.to_string(),
      target: HttpTarget::get("http://carrier.local/events"),
      window_minutes: 5,
      carrier_id: Some("7".to_string()),
      active: true,
    }
  }

  fn scheduler(store: Arc<MemoryStore>, locks: Arc<MemoryLockStore>) -> Scheduler {
    let queue = Queue::new(Arc::new(MemoryBroker::new()), [JOB_RUN_AGENDAMENTO]);
    Scheduler::new(store, locks, queue, SchedulerConfig::default())
  }

  fn at(h: u32, m: u32, s: u32, ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap() + chrono::Duration::milliseconds(ms)
  }

  #[tokio::test]
  async fn test_tick_enqueues_once_per_window() {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(MemoryLockStore::new());
    let saved = store.save_schedule(schedule("* * * * *")).await.unwrap();
    let a = scheduler(store.clone(), locks.clone());
    let b = scheduler(store, locks);

    let now = at(12, 0, 0, 300);
    let first = a.tick_at(now).await;
    assert_eq!(first.enqueued.len(), 1);
    assert_eq!(first.enqueued[0].0, saved.id);

    // 同一实例不重复评估窗口
    let again = a.tick_at(now).await;
    assert!(again.enqueued.is_empty());
    assert_eq!(again.not_due, vec![saved.id]);

    let other = b.tick_at(now).await;
    assert!(other.enqueued.is_empty());
    assert_eq!(other.skipped, vec![saved.id]);
  }

  #[tokio::test]
  async fn test_jittered_ticks_claim_each_fire_once() {
    let store = Arc::new(MemoryStore::new());
    let saved = store.save_schedule(schedule("* * * * *")).await.unwrap();
    let scheduler = scheduler(store, Arc::new(MemoryLockStore::new()));

    let early = scheduler.tick_at(at(12, 0, 0, 300)).await;
    assert_eq!(early.enqueued.len(), 1);

    // 抖动导致同一节拍槽内的第二次触发
    let late = scheduler.tick_at(at(12, 0, 59, 900)).await;
    assert!(late.enqueued.is_empty());
    assert_eq!(late.not_due, vec![saved.id]);

    // 下一个槽评估 12:01 的触发点，锁仍由 12:00 的窗口持有
    let next = scheduler.tick_at(at(12, 1, 0, 200)).await;
    assert!(next.not_due.is_empty());
    assert_eq!(next.skipped, vec![saved.id]);
  }

  #[test]
  fn test_tick_window_aligns_to_grid() {
    let tick = Duration::from_secs(60);
    assert_eq!(tick_window(at(12, 0, 0, 300), tick), (at(11, 59, 0, 0), at(12, 0, 0, 0)));
    assert_eq!(tick_window(at(12, 0, 59, 900), tick), (at(11, 59, 0, 0), at(12, 0, 0, 0)));
    assert_eq!(tick_window(at(12, 1, 0, 0), tick), (at(12, 0, 0, 0), at(12, 1, 0, 0)));
  }

  #[tokio::test]
  async fn test_tick_skips_schedules_not_due() {
    let store = Arc::new(MemoryStore::new());
    let saved = store.save_schedule(schedule("0 3 * * *")).await.unwrap();
    let scheduler = scheduler(store, Arc::new(MemoryLockStore::new()));
    let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let report = scheduler.tick_at(noon).await;
    assert_eq!(report.not_due, vec![saved.id]);
    assert!(report.enqueued.is_empty());
  }

  #[test]
  fn test_dispatch_job_payload() {
    let mut s = schedule("* * * * *");
    s.id = 42;
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let job = dispatch_job(&s, "abc", at, JobOptions::default()).unwrap();
    assert_eq!(job.job_type, JOB_RUN_AGENDAMENTO);
    assert_eq!(job.payload["schedule_id"], json!(42));
    assert_eq!(job.payload["transportadora_id"], json!("7"));
    assert_eq!(job.payload["target"]["url"], json!("http://carrier.local/events"));
    assert_eq!(job.options.trace_id.as_deref(), Some("abc"));
  }
}
