//! 重试与死信队列集成测试
//! Retry and dead-letter queue integration tests

use chrono::{Duration as ChronoDuration, Utc};
use ocorrencias::backend::memdb::{MemoryBroker, MemoryStore};
use ocorrencias::base::ExecutionLog;
use ocorrencias::error::Error;
use ocorrencias::inspector::{DlqFilter, Inspector};
use ocorrencias::job::{JobInfo, JobOptions, JobStatus};
use ocorrencias::model::ExecutionStatus;
use ocorrencias::queue::Queue;
use ocorrencias::registry::JobRegistry;
use ocorrencias::worker::{WorkerConfig, WorkerPool};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FLAKY: &str = "sempre-falha";

fn worker_config() -> WorkerConfig {
  WorkerConfig {
    poll_interval: Duration::from_millis(5),
    job_timeout: Duration::from_secs(1),
    shutdown_timeout: Duration::from_secs(1),
  }
}

fn failing_registry(calls: Arc<AtomicUsize>) -> Arc<JobRegistry> {
  let mut registry = JobRegistry::new();
  registry.handle_async_func(FLAKY, move |_job: JobInfo| {
    let calls = calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err::<Value, _>(Error::other("carrier unavailable"))
    }
  });
  Arc::new(registry)
}

async fn wait_for_status(queue: &Queue, id: &str, status: JobStatus) -> JobInfo {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  loop {
    let job = queue.get_job(id).await.unwrap().unwrap();
    if job.status == status {
      return job;
    }
    assert!(
      tokio::time::Instant::now() < deadline,
      "job {id} stuck in {}",
      job.status
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

#[tokio::test]
async fn test_exhausted_job_lands_in_dlq_after_k_attempts() {
  let calls = Arc::new(AtomicUsize::new(0));
  let registry = failing_registry(calls.clone());
  let broker = Arc::new(MemoryBroker::new());
  let store = Arc::new(MemoryStore::new());
  let queue = Queue::new(broker.clone(), registry.job_types());

  let options = JobOptions::default()
    .with_attempts(3)
    .with_backoff_base(Duration::from_millis(5));
  let id = queue
    .enqueue(FLAKY, json!({"transportadora": "jadlog"}), options)
    .await
    .unwrap();

  let mut pool = WorkerPool::new(queue.clone(), store.clone(), registry, worker_config());
  pool.start().unwrap();
  let dead = wait_for_status(&queue, &id, JobStatus::Dead).await;
  pool.shutdown().await;

  assert_eq!(calls.load(Ordering::SeqCst), 3);
  assert_eq!(dead.attempts, 3);
  assert_eq!(dead.last_error.as_deref(), Some("Other error: carrier unavailable"));
  assert_eq!(broker.count(JobStatus::Waiting).await, 0);
  assert_eq!(broker.count(JobStatus::Active).await, 0);

  let executions = store.list_executions(&id).await.unwrap();
  assert_eq!(executions.len(), 3);
  assert!(executions
    .iter()
    .all(|e| e.status == ExecutionStatus::Error && e.trace_id == dead.trace_id));
  let attempts: Vec<u32> = executions.iter().map(|e| e.attempt_number).collect();
  assert_eq!(attempts, vec![1, 2, 3]);

  let inspector = Inspector::new(broker.clone());
  let listed = inspector
    .list_dead(&DlqFilter::new().with_carrier("jadlog"))
    .await
    .unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn test_replay_keeps_payload_and_leaves_dlq() {
  let calls = Arc::new(AtomicUsize::new(0));
  let registry = failing_registry(calls);
  let broker = Arc::new(MemoryBroker::new());
  let queue = Queue::new(broker.clone(), registry.job_types());

  let payload = json!({
    "transportadora": "correios",
    "slug": "rastreio",
    "body": {"eventos": [{"codigo": "ENT", "chave_nf": "NF9"}]},
  });
  let id = queue
    .enqueue(FLAKY, payload.clone(), JobOptions::default().with_attempts(1))
    .await
    .unwrap();

  let mut pool = WorkerPool::new(
    queue.clone(),
    Arc::new(MemoryStore::new()),
    registry,
    worker_config(),
  );
  pool.start().unwrap();
  let dead = wait_for_status(&queue, &id, JobStatus::Dead).await;
  pool.shutdown().await;

  let inspector = Inspector::new(broker.clone());
  let replayed = inspector
    .replay(&DlqFilter::new().with_name(FLAKY))
    .await
    .unwrap();
  assert_eq!(replayed, vec![id.clone()]);

  let job = queue.get_job(&id).await.unwrap().unwrap();
  assert_eq!(job.status, JobStatus::Waiting);
  assert_eq!(job.attempts, 0);
  assert_eq!(Value::Object(job.payload.clone()), payload);
  assert_eq!(job.payload, dead.payload);
  assert_eq!(job.trace_id, dead.trace_id);
  assert!(inspector
    .list_dead(&DlqFilter::new())
    .await
    .unwrap()
    .is_empty());

  // 已离开死信队列，再次重放单个作业会失败
  assert!(matches!(
    inspector.replay_one(&id).await,
    Err(Error::JobNotFound { .. })
  ));
}

#[tokio::test]
async fn test_dlq_filters_by_name_carrier_and_date() {
  let calls = Arc::new(AtomicUsize::new(0));
  let mut registry = JobRegistry::new();
  for job_type in [FLAKY, "outro-tipo"] {
    let calls = calls.clone();
    registry.handle_async_func(job_type, move |_job: JobInfo| {
      let calls = calls.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<Value, _>(Error::other("boom"))
      }
    });
  }
  let registry = Arc::new(registry);
  let broker = Arc::new(MemoryBroker::new());
  let queue = Queue::new(broker.clone(), registry.job_types());
  let once = || JobOptions::default().with_attempts(1);

  let jadlog = queue
    .enqueue(FLAKY, json!({"transportadora": "jadlog"}), once())
    .await
    .unwrap();
  let correios = queue
    .enqueue(FLAKY, json!({"transportadora_id": "correios"}), once())
    .await
    .unwrap();
  let other = queue
    .enqueue("outro-tipo", json!({"transportadora": "jadlog"}), once())
    .await
    .unwrap();

  let mut pool = WorkerPool::new(
    queue.clone(),
    Arc::new(MemoryStore::new()),
    registry,
    worker_config(),
  );
  pool.start().unwrap();
  for id in [&jadlog, &correios, &other] {
    wait_for_status(&queue, id, JobStatus::Dead).await;
  }
  pool.shutdown().await;

  let inspector = Inspector::new(broker);
  let ids = |jobs: Vec<JobInfo>| {
    let mut ids: Vec<String> = jobs.into_iter().map(|j| j.id).collect();
    ids.sort();
    ids
  };
  let mut expected = vec![jadlog.clone(), other.clone()];
  expected.sort();

  let by_carrier = inspector
    .list_dead(&DlqFilter::new().with_carrier("jadlog"))
    .await
    .unwrap();
  assert_eq!(ids(by_carrier), expected);

  let by_name_and_carrier = inspector
    .list_dead(&DlqFilter::new().with_name(FLAKY).with_carrier("correios"))
    .await
    .unwrap();
  assert_eq!(ids(by_name_and_carrier), vec![correios.clone()]);

  let now = Utc::now();
  let recent = inspector
    .list_dead(&DlqFilter::new().between(Some(now - ChronoDuration::hours(1)), Some(now)))
    .await
    .unwrap();
  assert_eq!(recent.len(), 3);

  let tomorrow = now + ChronoDuration::days(1);
  let future = inspector
    .list_dead(&DlqFilter::new().between(Some(tomorrow), None))
    .await
    .unwrap();
  assert!(future.is_empty());
}
