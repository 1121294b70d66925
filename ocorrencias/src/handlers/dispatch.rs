//! 调度分发处理器
//! Schedule dispatch handler
//!
//! 调用调度目标（有超时），目标响应中携带事件批次且承运商已知时交给摄取处理
//! Calls the schedule target under a timeout; when the response carries an event batch
//! and the carrier is known, the batch goes through ingestion

use crate::base::Store;
use crate::error::{Error, Result};
use crate::ingestion::{extract_batch, Ingestor};
use crate::job::JobInfo;
use crate::model::HttpTarget;
use crate::registry::Handler;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ERROR_BODY_LIMIT: usize = 512;

pub struct DispatchHandler {
  store: Arc<dyn Store>,
  ingestor: Ingestor,
  client: reqwest::Client,
}

impl DispatchHandler {
  pub fn new(store: Arc<dyn Store>, ingestor: Ingestor, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("ocorrencias/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      store,
      ingestor,
      client,
    })
  }

  /// 负载里的目标快照优先，否则读取调度定义
  /// The target snapshot in the payload wins, otherwise the schedule definition is read
  async fn resolve_target(&self, job: &JobInfo) -> Result<(HttpTarget, Option<String>)> {
    if let Some(target) = job.payload.get("target") {
      let target: HttpTarget = serde_json::from_value(target.clone())?;
      return Ok((target, job.carrier()));
    }
    let id = job
      .schedule_id()
      .ok_or_else(|| Error::InvalidPayload("dispatch job without schedule_id".to_string()))?;
    let schedule = self
      .store
      .get_schedule(id)
      .await?
      .ok_or(Error::ScheduleNotFound { id })?;
    let carrier = job.carrier().or(schedule.carrier_id);
    Ok((schedule.target, carrier))
  }
}

#[async_trait]
impl Handler for DispatchHandler {
  async fn process_job(&self, job: &JobInfo) -> Result<Value> {
    let (target, carrier) = self.resolve_target(job).await?;
    let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
      .map_err(|e| Error::InvalidPayload(format!("invalid method {}: {e}", target.method)))?;

    let mut request = self
      .client
      .request(method.clone(), &target.url)
      .header("x-trace-id", &job.trace_id);
    for (name, value) in &target.headers {
      request = request.header(name, value);
    }
    if let Some(body) = &target.payload {
      if method != Method::GET {
        request = request.json(body);
      }
    }

    let started = Instant::now();
    let response = request.send().await.map_err(|e| {
      if e.is_timeout() {
        Error::Timeout
      } else {
        Error::Http(e)
      }
    })?;
    let status = response.status();
    let text = response.text().await?;
    let duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
      job_id = %job.id,
      trace_id = %job.trace_id,
      url = %target.url,
      status = status.as_u16(),
      duration_ms,
      "Dispatch target answered"
    );

    if !status.is_success() {
      let body: String = text.chars().take(ERROR_BODY_LIMIT).collect();
      return Err(Error::HttpStatus {
        status: status.as_u16(),
        body,
      });
    }

    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    let processed = match (&carrier, extract_batch(&body)) {
      (Some(carrier), Some(batch)) => Some(self.ingestor.ingest(carrier, &batch, &job.trace_id).await?),
      _ => None,
    };

    Ok(json!({
      "status": status.as_u16(),
      "duration_ms": duration_ms,
      "body": body,
      "processed_count": processed,
    }))
  }
}
