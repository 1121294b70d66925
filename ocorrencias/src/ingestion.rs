//! 事件摄取
//! Event ingestion
//!
//! 将承运商推送或拉取的原始记录归一化为事件（ocorrência）。
//! Normalizes raw carrier records, pushed or pulled, into occurrences.
//!
//! 每条记录：
//! Per record:
//!
//! 1. 通过候选字段链提取发票键、代码、描述和时间；缺少键或代码的记录被跳过
//!    Extract invoice key, code, description and time through field chains; records without key or code are skipped
//! 2. 按发票键查找运单，找不到则跳过
//!    Look the shipment up by invoice key, skip when absent
//! 3. 计算幂等键；已存在的事件只重新投影，计为重复
//!    Compute the idempotency key; an already stored occurrence is only re-projected and counted as duplicate
//! 4. 查找承运商代码映射；未映射时状态为 `unknown` 并写入管理错误
//!    Resolve the carrier code mapping; unmapped codes become `unknown` and raise an admin error
//! 5. 幂等写入事件，然后重新投影运单状态
//!    Insert the occurrence idempotently, then re-project the shipment status
//!
//! 单条记录的问题不会中断批次，只有系统性错误向上传播。
//! Per-record problems never abort the batch; only systemic errors propagate.

use crate::base::constants::{MAPEAMENTO_INEXISTENTE, STATUS_UNKNOWN};
use crate::base::Store;
use crate::error::Result;
use crate::model::{InsertOutcome, NewAdminError, NewOccurrence};
use crate::projector::Projector;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// 有序的候选字段名
/// Ordered list of candidate field names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChain(pub &'static [&'static str]);

pub const INVOICE_KEY: FieldChain = FieldChain(&["chave_nf", "nf_key", "invoice_key"]);
pub const STATUS_CODE: FieldChain = FieldChain(&["codigo", "status_code", "event_code"]);
pub const DESCRIPTION: FieldChain = FieldChain(&["descricao", "description", "message"]);
pub const OCCURRED_AT: FieldChain = FieldChain(&["data_ocorrencia", "event_date", "timestamp"]);
pub const EVENT_ID: FieldChain = FieldChain(&["id", "event_id", "evento_id"]);

/// 批次可能所在的字段
/// Fields that may hold the batch inside an object body
const BATCH_FIELDS: &[&str] = &["ocorrencias", "eventos", "events", "data", "items"];

impl FieldChain {
  /// 第一个非空的值
  /// First non-empty value
  pub fn resolve_value<'a>(&self, record: &'a Value) -> Option<&'a Value> {
    self
      .0
      .iter()
      .filter_map(|field| record.get(*field))
      .find(|value| match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
      })
  }

  /// 第一个可作为文本的值（字符串或数字）
  /// First value usable as text (string or number)
  pub fn resolve(&self, record: &Value) -> Option<String> {
    self
      .0
      .iter()
      .filter_map(|field| record.get(*field))
      .find_map(|value| match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
      })
  }
}

/// 规范化后的承运商记录
/// Canonical carrier record
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierRecord {
  pub invoice_key: String,
  pub code: String,
  pub description: Option<String>,
  pub occurred_at: Option<DateTime<Utc>>,
  pub event_id: Option<String>,
}

impl CarrierRecord {
  /// 缺少发票键或代码时返回 `None`
  /// `None` when the invoice key or the code is missing
  pub fn extract(record: &Value) -> Option<Self> {
    Some(Self {
      invoice_key: INVOICE_KEY.resolve(record)?,
      code: STATUS_CODE.resolve(record)?,
      description: DESCRIPTION.resolve(record),
      occurred_at: OCCURRED_AT.resolve_value(record).and_then(parse_occurred_at),
      event_id: EVENT_ID.resolve(record),
    })
  }
}

/// 解析事件时间，无时区的时间按 UTC 处理
/// Parse an event time; naive times are taken as UTC
pub fn parse_occurred_at(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::Number(n) => n.as_i64().and_then(from_epoch),
    Value::String(s) => parse_time_str(s.trim()),
    _ => None,
  }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
  // 大于 1e11 的按毫秒处理
  if value.abs() > 100_000_000_000 {
    Utc.timestamp_millis_opt(value).single()
  } else {
    Utc.timestamp_opt(value, 0).single()
  }
}

fn parse_time_str(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
  ];
  for format in DATETIME_FORMATS {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
      return Some(Utc.from_utc_datetime(&naive));
    }
  }
  for format in ["%Y-%m-%d", "%d/%m/%Y"] {
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
      return Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
  }
  s.parse::<i64>().ok().and_then(from_epoch)
}

/// 从响应或 webhook 正文中取出事件批次
/// Pull the event batch out of a response or webhook body
pub fn extract_batch(body: &Value) -> Option<Vec<Value>> {
  match body {
    Value::Array(items) => Some(items.clone()),
    Value::Object(map) => {
      for field in BATCH_FIELDS {
        if let Some(Value::Array(items)) = map.get(*field) {
          return Some(items.clone());
        }
      }
      STATUS_CODE.resolve(body).map(|_| vec![body.clone()])
    }
    _ => None,
  }
}

/// 事件的幂等键
/// Idempotency key of an occurrence
///
/// - 有事件 id：`evt:{carrier}:{event_id}`
/// - 有事件时间：`{shipment}:{carrier}:{code}:{rfc3339}`
/// - 两者都没有：`raw:{shipment}:{carrier}:{code}:{sha256}`，对原始记录的规范 JSON 取哈希，
///   因此同一记录的重复投递得到相同的键
///
/// Undated records without an event id hash the canonical JSON of the raw record, so a
/// redelivery of the same record maps to the same key.
pub fn dedup_key(carrier_id: &str, shipment_id: i64, record: &CarrierRecord, raw: &Value) -> String {
  if let Some(event_id) = &record.event_id {
    return format!("evt:{carrier_id}:{event_id}");
  }
  match record.occurred_at {
    Some(occurred_at) => format!(
      "{}:{}:{}:{}",
      shipment_id,
      carrier_id,
      record.code,
      occurred_at.to_rfc3339()
    ),
    None => format!(
      "raw:{}:{}:{}:{}",
      shipment_id,
      carrier_id,
      record.code,
      raw_digest(raw)
    ),
  }
}

/// 规范 JSON（键排序、无空白）的 SHA-256 十六进制摘要
/// Hex SHA-256 of the canonical JSON form (sorted keys, no whitespace)
pub fn raw_digest(raw: &Value) -> String {
  let mut canonical = String::new();
  write_canonical(raw, &mut canonical);
  hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

/// 一次摄取的统计
/// Counters for one ingestion call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
  /// 成功处理（包括重复投递）
  /// Successfully processed, redeliveries included
  pub processed: usize,
  pub duplicates: usize,
  pub unmapped: usize,
  pub skipped_malformed: usize,
  pub skipped_unknown_shipment: usize,
}

/// 摄取处理器
/// Ingestion handler
#[derive(Clone)]
pub struct Ingestor {
  store: Arc<dyn Store>,
  projector: Projector,
}

impl Ingestor {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self {
      projector: Projector::new(store.clone()),
      store,
    }
  }

  /// 摄取一个批次，返回成功处理的记录数
  /// Ingest a batch, returning how many records were processed
  pub async fn ingest(&self, carrier_id: &str, records: &[Value], trace_id: &str) -> Result<usize> {
    Ok(self.ingest_batch(carrier_id, records, trace_id).await?.processed)
  }

  pub async fn ingest_batch(
    &self,
    carrier_id: &str,
    records: &[Value],
    trace_id: &str,
  ) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    for (index, raw) in records.iter().enumerate() {
      let Some(record) = CarrierRecord::extract(raw) else {
        tracing::warn!(
          trace_id,
          carrier = carrier_id,
          index,
          "Skipping carrier record without invoice key or status code"
        );
        report.skipped_malformed += 1;
        continue;
      };
      self
        .ingest_record(carrier_id, record, raw, trace_id, &mut report)
        .await?;
    }
    tracing::info!(
      trace_id,
      carrier = carrier_id,
      received = records.len(),
      processed = report.processed,
      unmapped = report.unmapped,
      duplicates = report.duplicates,
      "Carrier batch ingested"
    );
    Ok(report)
  }

  async fn ingest_record(
    &self,
    carrier_id: &str,
    record: CarrierRecord,
    raw: &Value,
    trace_id: &str,
    report: &mut IngestReport,
  ) -> Result<()> {
    let Some(shipment) = self
      .store
      .find_shipment_by_invoice_key(&record.invoice_key)
      .await?
    else {
      tracing::info!(
        trace_id,
        carrier = carrier_id,
        invoice_key = %record.invoice_key,
        "Shipment not found, skipping record"
      );
      report.skipped_unknown_shipment += 1;
      return Ok(());
    };

    let dedup_key = dedup_key(carrier_id, shipment.id, &record, raw);
    // 重复投递在映射查找之前短路，不会重复写入管理错误
    if let Some(existing) = self.store.find_occurrence_by_dedup_key(&dedup_key).await? {
      self.count_duplicate(shipment.id, existing.id, trace_id, report).await?;
      return Ok(());
    }

    let mapping = self.store.find_mapping(carrier_id, &record.code).await?;
    let (internal_code, status) = match mapping {
      Some(m) => (Some(m.internal_occurrence_code), m.normalized_status),
      None => {
        report.unmapped += 1;
        self.report_missing_mapping(carrier_id, &record, trace_id).await;
        (None, STATUS_UNKNOWN.to_string())
      }
    };

    let outcome = self
      .store
      .insert_occurrence(NewOccurrence {
        shipment_id: shipment.id,
        carrier_id: carrier_id.to_string(),
        external_code: record.code,
        internal_occurrence_code: internal_code,
        normalized_status: status,
        description: record.description,
        occurred_at: record.occurred_at.unwrap_or_else(Utc::now),
        raw_payload: raw.clone(),
        dedup_key,
        trace_id: trace_id.to_string(),
      })
      .await?;

    match outcome {
      InsertOutcome::Inserted(_) => {
        self.projector.project(shipment.id).await?;
        report.processed += 1;
      }
      // 并发投递在检查之后抢先写入
      InsertOutcome::Duplicate(existing) => {
        self.count_duplicate(shipment.id, existing.id, trace_id, report).await?;
      }
    }
    Ok(())
  }

  /// 重复投递同样重新投影，修复上次投影失败留下的状态
  /// A redelivery still re-projects, repairing a status left behind by a failed projection
  async fn count_duplicate(
    &self,
    shipment_id: i64,
    occurrence_id: i64,
    trace_id: &str,
    report: &mut IngestReport,
  ) -> Result<()> {
    tracing::debug!(
      trace_id,
      occurrence_id,
      "Duplicate delivery of an existing occurrence"
    );
    self.projector.project(shipment_id).await?;
    report.duplicates += 1;
    report.processed += 1;
    Ok(())
  }

  /// 未映射代码不能阻塞事件写入，写管理错误失败时只记录日志
  /// An unmapped code must not block the occurrence; a failed admin write is only logged
  async fn report_missing_mapping(&self, carrier_id: &str, record: &CarrierRecord, trace_id: &str) {
    tracing::warn!(
      trace_id,
      carrier = carrier_id,
      code = %record.code,
      "No mapping for carrier code"
    );
    let entry = NewAdminError {
      codigo: MAPEAMENTO_INEXISTENTE.to_string(),
      mensagem: format!(
        "Código '{}' da transportadora {} sem mapeamento",
        record.code, carrier_id
      ),
      contexto: json!({
        "transportadora_id": carrier_id,
        "codigo": record.code,
        "chave_nf": record.invoice_key,
      }),
      trace_id: Some(trace_id.to_string()),
    };
    if let Err(e) = self.store.record_admin_error(entry).await {
      tracing::error!(trace_id, error = %e, "Failed to record missing mapping");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_field_chain_fallback_order() {
    let record = json!({"nf_key": "NF9", "invoice_key": "NF0", "status_code": 12});
    assert_eq!(INVOICE_KEY.resolve(&record).as_deref(), Some("NF9"));
    assert_eq!(STATUS_CODE.resolve(&record).as_deref(), Some("12"));
    assert_eq!(DESCRIPTION.resolve(&record), None);

    let record = json!({"chave_nf": "  ", "nf_key": "NF2"});
    assert_eq!(INVOICE_KEY.resolve(&record).as_deref(), Some("NF2"));
  }

  #[test]
  fn test_extract_requires_key_and_code() {
    assert!(CarrierRecord::extract(&json!({"descricao": "sem chave"})).is_none());
    assert!(CarrierRecord::extract(&json!({"chave_nf": "NF1"})).is_none());
    let record = CarrierRecord::extract(&json!({
      "chave_nf": "NF1",
      "codigo": "ENT",
      "message": "Entregue",
      "event_date": "2024-02-01 10:30:00",
      "event_id": "abc"
    }))
    .unwrap();
    assert_eq!(record.description.as_deref(), Some("Entregue"));
    assert_eq!(
      record.occurred_at,
      Some(Utc.with_ymd_and_hms(2024, 2, 1, 10, 30, 0).unwrap())
    );
    assert_eq!(record.event_id.as_deref(), Some("abc"));
  }

  #[test]
  fn test_parse_occurred_at_formats() {
    let expected = Utc.with_ymd_and_hms(2024, 2, 1, 10, 30, 0).unwrap();
    assert_eq!(parse_occurred_at(&json!("2024-02-01T10:30:00Z")), Some(expected));
    assert_eq!(parse_occurred_at(&json!("2024-02-01T07:30:00-03:00")), Some(expected));
    assert_eq!(parse_occurred_at(&json!("01/02/2024 10:30")), Some(expected));
    assert_eq!(parse_occurred_at(&json!(expected.timestamp())), Some(expected));
    assert_eq!(
      parse_occurred_at(&json!(expected.timestamp_millis())),
      Some(expected)
    );
    assert_eq!(parse_occurred_at(&json!("ontem")), None);
  }

  #[test]
  fn test_undated_dedup_key_is_stable() {
    let raw = json!({"chave_nf": "NF1", "codigo": "ENT", "extra": {"b": 1, "a": [true, null]}});
    let reordered = json!({"extra": {"a": [true, null], "b": 1}, "codigo": "ENT", "chave_nf": "NF1"});
    let record = CarrierRecord::extract(&raw).unwrap();
    let first = dedup_key("transp-1", 7, &record, &raw);
    assert!(first.starts_with("raw:7:transp-1:ENT:"));
    assert_eq!(first, dedup_key("transp-1", 7, &record, &reordered));

    let other = json!({"chave_nf": "NF1", "codigo": "ENT", "extra": {"b": 2}});
    assert_ne!(first, dedup_key("transp-1", 7, &record, &other));
  }

  #[test]
  fn test_dedup_key_prefers_event_id_then_time() {
    let raw = json!({"chave_nf": "NF1", "codigo": "ENT", "id": "e-1", "timestamp": "2024-02-01T10:30:00Z"});
    let record = CarrierRecord::extract(&raw).unwrap();
    assert_eq!(dedup_key("transp-1", 7, &record, &raw), "evt:transp-1:e-1");

    let raw = json!({"chave_nf": "NF1", "codigo": "ENT", "timestamp": "2024-02-01T10:30:00Z"});
    let record = CarrierRecord::extract(&raw).unwrap();
    assert_eq!(
      dedup_key("transp-1", 7, &record, &raw),
      "7:transp-1:ENT:2024-02-01T10:30:00+00:00"
    );
  }

  #[test]
  fn test_extract_batch_shapes() {
    assert_eq!(extract_batch(&json!([{"codigo": "A"}])).unwrap().len(), 1);
    assert_eq!(
      extract_batch(&json!({"ocorrencias": [{}, {}]})).unwrap().len(),
      2
    );
    assert_eq!(
      extract_batch(&json!({"codigo": "ENT", "chave_nf": "NF1"}))
        .unwrap()
        .len(),
      1
    );
    assert!(extract_batch(&json!({"ok": true})).is_none());
    assert!(extract_batch(&json!("texto")).is_none());
  }
}
