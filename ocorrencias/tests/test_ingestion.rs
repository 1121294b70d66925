//! 摄取管线集成测试
//! Ingestion pipeline integration tests

use ocorrencias::backend::memdb::MemoryStore;
use ocorrencias::base::constants::{MAPEAMENTO_INEXISTENTE, STATUS_UNKNOWN};
use ocorrencias::base::{AdminErrorLog, MappingStore, OccurrenceStore, ShipmentStore};
use ocorrencias::ingestion::Ingestor;
use ocorrencias::model::{CarrierCodeMapping, Shipment};
use serde_json::json;
use std::sync::Arc;

async fn setup(invoice_keys: &[&str]) -> (Arc<MemoryStore>, Ingestor) {
  let store = Arc::new(MemoryStore::new());
  for key in invoice_keys {
    store.save_shipment(Shipment::new(*key)).await.unwrap();
  }
  store
    .save_mapping(CarrierCodeMapping::new("jadlog", "ENT", "01", "entregue"))
    .await
    .unwrap();
  store
    .save_mapping(CarrierCodeMapping::new("jadlog", "TRA", "02", "em_transito"))
    .await
    .unwrap();
  let ingestor = Ingestor::new(store.clone());
  (store, ingestor)
}

#[tokio::test]
async fn test_mapped_code_sets_shipment_status() {
  let (store, ingestor) = setup(&["NF1"]).await;

  let processed = ingestor
    .ingest("jadlog", &[json!({"codigo": "ENT", "chave_nf": "NF1"})], "t-1")
    .await
    .unwrap();
  assert_eq!(processed, 1);

  let shipment = store.find_shipment_by_invoice_key("NF1").await.unwrap().unwrap();
  assert_eq!(shipment.current_status.as_deref(), Some("entregue"));
  let occurrences = store.list_occurrences(shipment.id).await.unwrap();
  assert_eq!(occurrences.len(), 1);
  assert_eq!(occurrences[0].normalized_status, "entregue");
  assert_eq!(occurrences[0].internal_occurrence_code.as_deref(), Some("01"));
  assert_eq!(occurrences[0].trace_id, "t-1");
  assert!(store.list_admin_errors(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_record_is_skipped() {
  let (_, ingestor) = setup(&["NF1", "NF2"]).await;

  let batch = [
    json!({"codigo": "ENT", "chave_nf": "NF1"}),
    json!({"descricao": "sem chave"}),
    json!({"status_code": "TRA", "nf_key": "NF2"}),
  ];
  let report = ingestor.ingest_batch("jadlog", &batch, "t-2").await.unwrap();
  assert_eq!(report.processed, 2);
  assert_eq!(report.skipped_malformed, 1);
}

#[tokio::test]
async fn test_unmapped_code_is_unknown_and_reported() {
  let (store, ingestor) = setup(&["NF3"]).await;

  let processed = ingestor
    .ingest(
      "jadlog",
      &[json!({"event_code": "XYZ", "invoice_key": "NF3", "message": "avaria"})],
      "t-3",
    )
    .await
    .unwrap();
  assert_eq!(processed, 1);

  let shipment = store.find_shipment_by_invoice_key("NF3").await.unwrap().unwrap();
  assert_eq!(shipment.current_status.as_deref(), Some(STATUS_UNKNOWN));
  let occurrence = store.latest_occurrence(shipment.id).await.unwrap().unwrap();
  assert_eq!(occurrence.normalized_status, STATUS_UNKNOWN);
  assert_eq!(occurrence.internal_occurrence_code, None);
  assert_eq!(occurrence.description.as_deref(), Some("avaria"));

  let errors = store
    .list_admin_errors(Some(MAPEAMENTO_INEXISTENTE))
    .await
    .unwrap();
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].contexto["codigo"], json!("XYZ"));
  assert_eq!(errors[0].trace_id.as_deref(), Some("t-3"));
}

#[tokio::test]
async fn test_unknown_shipment_is_skipped() {
  let (store, ingestor) = setup(&[]).await;
  let report = ingestor
    .ingest_batch("jadlog", &[json!({"codigo": "ENT", "chave_nf": "NF404"})], "t-4")
    .await
    .unwrap();
  assert_eq!(report.processed, 0);
  assert_eq!(report.skipped_unknown_shipment, 1);
  assert!(store.list_admin_errors(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_occurred_at_wins_regardless_of_arrival() {
  let (store, ingestor) = setup(&["NF5"]).await;

  // T1, T3, T2
  let batch = [
    json!({"codigo": "TRA", "chave_nf": "NF5", "data_ocorrencia": "2024-03-01T08:00:00Z"}),
    json!({"codigo": "ENT", "chave_nf": "NF5", "data_ocorrencia": "2024-03-03T08:00:00Z"}),
    json!({"codigo": "TRA", "chave_nf": "NF5", "data_ocorrencia": "2024-03-02T08:00:00Z"}),
  ];
  assert_eq!(ingestor.ingest("jadlog", &batch, "t-5").await.unwrap(), 3);

  let shipment = store.find_shipment_by_invoice_key("NF5").await.unwrap().unwrap();
  assert_eq!(shipment.current_status.as_deref(), Some("entregue"));
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
  let (store, ingestor) = setup(&["NF6"]).await;
  let batch = [
    json!({"id": "ev-1", "codigo": "TRA", "chave_nf": "NF6"}),
    json!({"codigo": "ENT", "chave_nf": "NF6", "timestamp": 1709280000}),
  ];

  let first = ingestor.ingest_batch("jadlog", &batch, "t-6").await.unwrap();
  let second = ingestor.ingest_batch("jadlog", &batch, "t-7").await.unwrap();
  assert_eq!(first.processed, 2);
  assert_eq!(first.duplicates, 0);
  assert_eq!(second.processed, 2);
  assert_eq!(second.duplicates, 2);

  let shipment = store.find_shipment_by_invoice_key("NF6").await.unwrap().unwrap();
  assert_eq!(store.list_occurrences(shipment.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_undated_redelivery_keeps_one_row() {
  let (store, ingestor) = setup(&["NF7"]).await;
  let batch = [json!({"codigo": "TRA", "chave_nf": "NF7", "descricao": "em rota"})];

  ingestor.ingest_batch("jadlog", &batch, "t-8").await.unwrap();
  tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  let second = ingestor.ingest_batch("jadlog", &batch, "t-9").await.unwrap();
  assert_eq!(second.processed, 1);
  assert_eq!(second.duplicates, 1);

  let shipment = store.find_shipment_by_invoice_key("NF7").await.unwrap().unwrap();
  let occurrences = store.list_occurrences(shipment.id).await.unwrap();
  assert_eq!(occurrences.len(), 1);
  assert!(occurrences[0].dedup_key.starts_with("raw:"));
}

#[tokio::test]
async fn test_redelivery_repairs_stale_projection() {
  let (store, ingestor) = setup(&["NF8"]).await;
  let batch = [json!({"id": "ev-8", "codigo": "ENT", "chave_nf": "NF8"})];
  ingestor.ingest("jadlog", &batch, "t-10").await.unwrap();

  // 投影在上次写入后失败，状态落后
  let shipment = store.find_shipment_by_invoice_key("NF8").await.unwrap().unwrap();
  store.set_current_status(shipment.id, "em_transito").await.unwrap();

  let report = ingestor.ingest_batch("jadlog", &batch, "t-11").await.unwrap();
  assert_eq!(report.duplicates, 1);
  let shipment = store.get_shipment(shipment.id).await.unwrap().unwrap();
  assert_eq!(shipment.current_status.as_deref(), Some("entregue"));
}

#[tokio::test]
async fn test_unmapped_redelivery_reports_once() {
  let (store, ingestor) = setup(&["NF9"]).await;
  let batch = [json!({"id": "ev-9", "codigo": "XYZ", "chave_nf": "NF9"})];

  let first = ingestor.ingest_batch("jadlog", &batch, "t-12").await.unwrap();
  let second = ingestor.ingest_batch("jadlog", &batch, "t-13").await.unwrap();
  assert_eq!(first.unmapped, 1);
  assert_eq!(second.unmapped, 0);
  assert_eq!(second.duplicates, 1);

  let errors = store
    .list_admin_errors(Some(MAPEAMENTO_INEXISTENTE))
    .await
    .unwrap();
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].trace_id.as_deref(), Some("t-12"));
}
