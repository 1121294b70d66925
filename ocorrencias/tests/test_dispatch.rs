//! 调度分发端到端测试：真实的 HTTP 目标、重试退避与批次摄取
//! Dispatch end-to-end tests: a real HTTP target, retry backoff and batch ingestion

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use ocorrencias::backend::memdb::{MemoryBroker, MemoryStore};
use ocorrencias::base::constants::JOB_RUN_AGENDAMENTO;
use ocorrencias::base::{ExecutionLog, MappingStore, ScheduleStore, ShipmentStore};
use ocorrencias::job::{JobInfo, JobOptions, JobStatus};
use ocorrencias::model::{
  CarrierCodeMapping, ExecutionStatus, HttpTarget, ScheduleDefinition, Shipment,
};
use ocorrencias::queue::Queue;
use ocorrencias::registry::JobRegistry;
use ocorrencias::scheduler::dispatch_job;
use ocorrencias::worker::{WorkerConfig, WorkerPool};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 前两次返回 500，之后返回一个事件批次
/// Answers 500 twice, then an event batch
async fn flaky_target(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, Json<Value>) {
  let n = hits.fetch_add(1, Ordering::SeqCst);
  if n < 2 {
    return (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(json!({"erro": "indisponivel"})),
    );
  }
  (
    StatusCode::OK,
    Json(json!({
      "eventos": [
        {"codigo": "ENT", "chave_nf": "NF1", "data_ocorrencia": "2024-03-01 10:00:00"},
        {"descricao": "sem chave"},
      ]
    })),
  )
}

async fn spawn_target(hits: Arc<AtomicUsize>) -> String {
  let app = Router::new()
    .route("/eventos", get(flaky_target))
    .with_state(hits);
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  format!("http://{addr}/eventos")
}

struct Harness {
  store: Arc<MemoryStore>,
  queue: Queue,
  pool: WorkerPool,
}

async fn harness() -> Harness {
  let store = Arc::new(MemoryStore::new());
  store.save_shipment(Shipment::new("NF1")).await.unwrap();
  store
    .save_mapping(CarrierCodeMapping::new("jadlog", "ENT", "01", "entregue"))
    .await
    .unwrap();
  let registry = Arc::new(
    JobRegistry::with_defaults(store.clone(), Duration::from_secs(30)).unwrap(),
  );
  let queue = Queue::new(Arc::new(MemoryBroker::new()), registry.job_types());
  let pool = WorkerPool::new(
    queue.clone(),
    store.clone(),
    registry,
    WorkerConfig {
      poll_interval: Duration::from_millis(2),
      job_timeout: Duration::from_secs(35),
      shutdown_timeout: Duration::from_secs(1),
    },
  );
  Harness { store, queue, pool }
}

async fn wait_terminal(queue: &Queue, id: &str) -> JobInfo {
  let deadline = Instant::now() + Duration::from_secs(10);
  loop {
    let job = queue.get_job(id).await.unwrap().unwrap();
    if job.status.is_terminal() {
      return job;
    }
    assert!(Instant::now() < deadline, "job {id} never finished");
    tokio::time::sleep(Duration::from_millis(2)).await;
  }
}

fn schedule(id: i64, url: String) -> ScheduleDefinition {
  ScheduleDefinition {
    id,
    name: "coleta-jadlog".to_string(),
    cron_expression: "*/5 * * * *".to_string(),
    target: HttpTarget::get(url),
    window_minutes: 5,
    carrier_id: Some("jadlog".to_string()),
    active: true,
  }
}

#[tokio::test]
async fn test_dispatch_retries_with_backoff_then_completes() {
  let hits = Arc::new(AtomicUsize::new(0));
  let url = spawn_target(hits.clone()).await;
  let mut h = harness().await;
  let schedule = h.store.save_schedule(schedule(42, url)).await.unwrap();

  let options = JobOptions::default()
    .with_attempts(3)
    .with_backoff_base(Duration::from_millis(10));
  let job = dispatch_job(&schedule, "trace-42", Utc::now(), options).unwrap();

  let started = Instant::now();
  let info = h.queue.enqueue_job(job).await.unwrap();
  h.pool.start().unwrap();
  let done = wait_terminal(&h.queue, &info.id).await;
  let elapsed = started.elapsed();
  h.pool.shutdown().await;

  assert_eq!(done.status, JobStatus::Completed);
  assert_eq!(done.attempts, 3);
  assert_eq!(hits.load(Ordering::SeqCst), 3);
  assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");

  let executions = h.store.list_executions(&info.id).await.unwrap();
  let statuses: Vec<ExecutionStatus> = executions.iter().map(|e| e.status).collect();
  assert_eq!(
    statuses,
    vec![
      ExecutionStatus::Error,
      ExecutionStatus::Error,
      ExecutionStatus::Success
    ]
  );
  assert!(executions.iter().all(|e| e.schedule_id == Some(42)));
  assert!(executions.iter().all(|e| e.trace_id == "trace-42"));
  let last = executions[2].response_payload.clone().unwrap();
  assert_eq!(last["status"], json!(200));
  assert_eq!(last["processed_count"], json!(1));

  let shipment = h.store.find_shipment_by_invoice_key("NF1").await.unwrap().unwrap();
  assert_eq!(shipment.current_status.as_deref(), Some("entregue"));
}

#[tokio::test]
async fn test_dispatch_without_snapshot_reads_schedule() {
  let hits = Arc::new(AtomicUsize::new(2));
  let url = spawn_target(hits.clone()).await;
  let mut h = harness().await;
  h.store.save_schedule(schedule(7, url)).await.unwrap();

  let id = h
    .queue
    .enqueue(
      JOB_RUN_AGENDAMENTO,
      json!({"schedule_id": 7}),
      JobOptions::default().with_attempts(1),
    )
    .await
    .unwrap();
  h.pool.start().unwrap();
  let done = wait_terminal(&h.queue, &id).await;
  h.pool.shutdown().await;

  assert_eq!(done.status, JobStatus::Completed);
  assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dispatch_for_missing_schedule_goes_dead() {
  let mut h = harness().await;
  let id = h
    .queue
    .enqueue(
      JOB_RUN_AGENDAMENTO,
      json!({"schedule_id": 999}),
      JobOptions::default().with_attempts(1),
    )
    .await
    .unwrap();
  h.pool.start().unwrap();
  let done = wait_terminal(&h.queue, &id).await;
  h.pool.shutdown().await;

  assert_eq!(done.status, JobStatus::Dead);
  assert_eq!(done.last_error.as_deref(), Some("Schedule not found: 999"));
}
