//! HTTP route tests against an in-memory backend

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use ocorrencias::backend::memdb::{MemoryBroker, MemoryStore};
use ocorrencias::base::constants::{JOB_PROCESS_WEBHOOK, JOB_RUN_AGENDAMENTO};
use ocorrencias::base::{Broker, ScheduleStore};
use ocorrencias::components::schedule_sync::{ScheduleSync, ScheduleSyncConfig};
use ocorrencias::job::JobStatus;
use ocorrencias::model::{HttpTarget, ScheduleDefinition};
use ocorrencias::queue::Queue;
use ocorrencias_server::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
  app: axum::Router,
  broker: Arc<MemoryBroker>,
  store: Arc<MemoryStore>,
  queue: Queue,
}

fn test_app() -> TestApp {
  let broker = Arc::new(MemoryBroker::new());
  let store = Arc::new(MemoryStore::new());
  let queue = Queue::new(broker.clone(), [JOB_RUN_AGENDAMENTO, JOB_PROCESS_WEBHOOK]);
  let app = router(Arc::new(AppState {
    queue: queue.clone(),
    store: store.clone(),
  }));
  TestApp {
    app,
    broker,
    store,
    queue,
  }
}

fn schedule() -> ScheduleDefinition {
  ScheduleDefinition {
    id: 0,
    name: "coleta-jadlog".to_string(),
    cron_expression: "*/10 * * * *".to_string(),
    target: HttpTarget::get("http://carrier.local/eventos"),
    window_minutes: 10,
    carrier_id: Some("jadlog".to_string()),
    active: true,
  }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let body = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, body)
}

fn post(uri: &str, body: &str) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(uri)
    .header("content-type", "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_webhook_is_acknowledged_and_enqueued() {
  let t = test_app();
  let (status, body) = send(
    &t.app,
    post(
      "/webhooks/jadlog/eventos",
      r#"{"eventos":[{"codigo":"ENT","chave_nf":"NF1"}]}"#,
    ),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(
    body,
    json!({"carrier": "jadlog", "slug": "eventos", "received": true})
  );
  assert_eq!(t.broker.count(JobStatus::Waiting).await, 1);

  let job = t
    .broker
    .dequeue(&[JOB_PROCESS_WEBHOOK.to_string()], Duration::from_secs(60))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(job.carrier().as_deref(), Some("jadlog"));
  assert_eq!(job.payload["body"]["eventos"][0]["codigo"], json!("ENT"));
  assert_eq!(
    job.payload["trace_id"].as_str(),
    Some(job.trace_id.as_str())
  );
}

#[tokio::test]
async fn test_webhook_rejects_non_json_body() {
  let t = test_app();
  let (status, body) = send(&t.app, post("/webhooks/jadlog/eventos", "<xml/>")).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("not JSON"));
  assert_eq!(t.broker.count(JobStatus::Waiting).await, 0);
}

#[tokio::test]
async fn test_run_schedule_returns_job_id() {
  let t = test_app();
  let saved = t.store.save_schedule(schedule()).await.unwrap();

  let (status, body) = send(&t.app, post(&format!("/jobs/run/{}", saved.id), "")).await;
  assert_eq!(status, StatusCode::ACCEPTED);
  let job_id = body["jobId"].as_str().unwrap().to_string();

  let job = t.queue.get_job(&job_id).await.unwrap().unwrap();
  assert_eq!(job.job_type, JOB_RUN_AGENDAMENTO);
  assert_eq!(job.schedule_id(), Some(saved.id));

  let (status, body) = send(&t.app, get(&format!("/jobs/{job_id}"))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["id"], json!(job_id));
  assert_eq!(body["status"], json!("waiting"));
  assert_eq!(body["type"], json!(JOB_RUN_AGENDAMENTO));
}

#[tokio::test]
async fn test_unknown_schedule_and_job_are_not_found() {
  let t = test_app();
  let (status, body) = send(&t.app, post("/jobs/run/404", "")).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], json!("Schedule not found: 404"));

  let (status, _) = send(&t.app, get("/jobs/nao-existe")).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queue_health_reports_drift_until_synced() {
  let t = test_app();
  let saved = t.store.save_schedule(schedule()).await.unwrap();

  let (status, body) = send(&t.app, get("/queues/health")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["ativos"], json!(1));
  assert_eq!(body["repeatables"], json!(0));
  assert_eq!(body["faltando"], json!([saved.repeatable_key()]));
  assert_eq!(body["sobrando"], json!([]));

  ScheduleSync::new(t.store.clone(), t.broker.clone(), ScheduleSyncConfig::default())
    .sync()
    .await
    .unwrap();

  let (_, body) = send(&t.app, get("/queues/health")).await;
  assert_eq!(body["repeatables"], json!(1));
  assert_eq!(body["faltando"], json!([]));
}

#[tokio::test]
async fn test_health() {
  let t = test_app();
  let (status, body) = send(&t.app, get("/health")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], json!("ok"));
}
