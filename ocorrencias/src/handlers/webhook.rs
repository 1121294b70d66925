use crate::error::{Error, Result};
use crate::ingestion::{extract_batch, Ingestor};
use crate::job::JobInfo;
use crate::registry::Handler;
use async_trait::async_trait;
use serde_json::{json, Value};

/// 处理入站 webhook 正文
/// Processes an inbound webhook body
///
/// 负载：`{transportadora, slug, body}`
/// Payload: `{transportadora, slug, body}`
pub struct WebhookHandler {
  ingestor: Ingestor,
}

impl WebhookHandler {
  pub fn new(ingestor: Ingestor) -> Self {
    Self { ingestor }
  }
}

#[async_trait]
impl Handler for WebhookHandler {
  async fn process_job(&self, job: &JobInfo) -> Result<Value> {
    let carrier = job
      .carrier()
      .ok_or_else(|| Error::InvalidPayload("webhook job without transportadora".to_string()))?;
    let body = job.payload.get("body").cloned().unwrap_or(Value::Null);
    let batch = extract_batch(&body).unwrap_or_default();
    let processed = self
      .ingestor
      .ingest(&carrier, &batch, &job.trace_id)
      .await?;
    Ok(json!({
      "transportadora": carrier,
      "slug": job.payload.get("slug").cloned().unwrap_or(Value::Null),
      "received": batch.len(),
      "processed_count": processed,
    }))
  }
}
