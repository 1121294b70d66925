//! HTTP request handlers
//!
//! Each handler only validates the request and enqueues work; the processing
//! itself happens in the worker pool.

use crate::error::{Error, Result};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use ocorrencias::base::constants::JOB_PROCESS_WEBHOOK;
use ocorrencias::base::{Broker, ScheduleStore};
use ocorrencias::health::{queue_health, QueueHealth};
use ocorrencias::job::{generate_trace_id, JobInfo};
use ocorrencias::scheduler::dispatch_job;
use serde_json::{json, Value};
use std::sync::Arc;

/// Parse an opaque carrier body; an empty body is `null`
fn parse_body(body: &Bytes) -> Result<Value> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  serde_json::from_slice(body).map_err(|e| Error::bad_request(format!("body is not JSON: {e}")))
}

/// `POST /webhooks/:carrier/:slug`
///
/// Stores the delivery as a `process-webhook` job so it gets the same retry
/// and DLQ handling as scheduled work.
pub async fn receive_webhook(
  State(state): State<Arc<AppState>>,
  Path((carrier, slug)): Path<(String, String)>,
  body: Bytes,
) -> Result<Json<Value>> {
  let body = parse_body(&body)?;
  let trace_id = generate_trace_id();
  let payload = json!({
    "transportadora": carrier,
    "slug": slug,
    "body": body,
    "trace_id": trace_id,
  });
  let options = state.queue.default_options().with_trace_id(trace_id.clone());
  let job_id = state
    .queue
    .enqueue(JOB_PROCESS_WEBHOOK, payload, options)
    .await?;
  tracing::info!(%carrier, %slug, %job_id, %trace_id, "Webhook received");
  Ok(Json(json!({
    "carrier": carrier,
    "slug": slug,
    "received": true,
  })))
}

/// `POST /jobs/run/:schedule_id`
pub async fn run_schedule(
  State(state): State<Arc<AppState>>,
  Path(schedule_id): Path<i64>,
) -> Result<(StatusCode, Json<Value>)> {
  let schedule = state
    .store
    .get_schedule(schedule_id)
    .await?
    .ok_or(ocorrencias::error::Error::ScheduleNotFound { id: schedule_id })?;
  let trace_id = generate_trace_id();
  let job = dispatch_job(
    &schedule,
    &trace_id,
    Utc::now(),
    state.queue.default_options(),
  )?;
  let info = state.queue.enqueue_job(job).await?;
  tracing::info!(schedule_id, job_id = %info.id, %trace_id, "Manual run enqueued");
  Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": info.id }))))
}

/// `GET /jobs/:id`
pub async fn get_job(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<Value>> {
  let job = state
    .queue
    .get_job(&id)
    .await?
    .ok_or(ocorrencias::error::Error::JobNotFound { id })?;
  Ok(Json(job_view(&job)))
}

/// `GET /queues/health`
pub async fn get_queue_health(State(state): State<Arc<AppState>>) -> Result<Json<QueueHealth>> {
  let health = queue_health(state.store.as_ref(), state.queue.broker().as_ref()).await?;
  if !health.is_consistent() {
    tracing::warn!(
      faltando = ?health.faltando,
      sobrando = ?health.sobrando,
      "Schedules and repeatables drifted"
    );
  }
  Ok(Json(health))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
  state.queue.broker().ping().await?;
  Ok(Json(json!({
    "status": "ok",
    "version": ocorrencias::VERSION,
  })))
}

/// JSON view of a persisted job
pub fn job_view(job: &JobInfo) -> Value {
  json!({
    "id": job.id,
    "type": job.job_type,
    "status": job.status.as_str(),
    "payload": job.payload,
    "trace_id": job.trace_id,
    "attempts": job.attempts,
    "max_attempts": job.max_attempts,
    "enqueued_at": job.enqueued_at.to_rfc3339(),
    "process_at": job.process_at.to_rfc3339(),
    "lease_until": job.lease_until.map(|t| t.to_rfc3339()),
    "finished_at": job.finished_at.map(|t| t.to_rfc3339()),
    "last_error": job.last_error,
  })
}
