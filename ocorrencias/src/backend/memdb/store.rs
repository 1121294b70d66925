//! 内存数据存储
//! In-memory data store

use crate::base::{
  AdminErrorLog, ExecutionLog, MappingStore, OccurrenceStore, ScheduleStore, ShipmentStore,
};
use crate::error::{Error, Result};
use crate::model::{
  AdminError, CarrierCodeMapping, ExecutionRecord, ExecutionStatus, InsertOutcome, NewAdminError,
  NewExecution, NewOccurrence, Occurrence, ScheduleDefinition, Shipment,
};
use crate::projector::latest_of;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreData {
  schedules: BTreeMap<i64, ScheduleDefinition>,
  mappings: BTreeMap<i64, CarrierCodeMapping>,
  shipments: BTreeMap<i64, Shipment>,
  occurrences: BTreeMap<i64, Occurrence>,
  /// dedup_key -> occurrence id
  dedup: HashMap<String, i64>,
  admin_errors: Vec<AdminError>,
  executions: BTreeMap<i64, ExecutionRecord>,
  next_id: i64,
}

impl StoreData {
  fn next_id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }
}

/// 内存数据存储
/// In-memory data store
#[derive(Clone, Default)]
pub struct MemoryStore {
  data: Arc<RwLock<StoreData>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
  async fn active_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
    let data = self.data.read().await;
    Ok(data.schedules.values().filter(|s| s.active).cloned().collect())
  }

  async fn get_schedule(&self, id: i64) -> Result<Option<ScheduleDefinition>> {
    Ok(self.data.read().await.schedules.get(&id).cloned())
  }

  async fn save_schedule(&self, mut schedule: ScheduleDefinition) -> Result<ScheduleDefinition> {
    schedule.validate()?;
    let mut data = self.data.write().await;
    if schedule.id == 0 {
      schedule.id = data.next_id();
    }
    data.schedules.insert(schedule.id, schedule.clone());
    Ok(schedule)
  }
}

#[async_trait]
impl MappingStore for MemoryStore {
  async fn find_mapping(
    &self,
    carrier_id: &str,
    external_code: &str,
  ) -> Result<Option<CarrierCodeMapping>> {
    let data = self.data.read().await;
    Ok(
      data
        .mappings
        .values()
        .find(|m| m.active && m.carrier_id == carrier_id && m.external_code == external_code)
        .cloned(),
    )
  }

  async fn save_mapping(&self, mut mapping: CarrierCodeMapping) -> Result<CarrierCodeMapping> {
    let mut data = self.data.write().await;
    if mapping.id == 0 {
      mapping.id = data.next_id();
    }
    if mapping.active {
      for other in data.mappings.values_mut() {
        if other.id != mapping.id
          && other.carrier_id == mapping.carrier_id
          && other.external_code == mapping.external_code
        {
          other.active = false;
        }
      }
    }
    data.mappings.insert(mapping.id, mapping.clone());
    Ok(mapping)
  }
}

#[async_trait]
impl ShipmentStore for MemoryStore {
  async fn find_shipment_by_invoice_key(&self, invoice_key: &str) -> Result<Option<Shipment>> {
    let data = self.data.read().await;
    Ok(
      data
        .shipments
        .values()
        .find(|s| s.invoice_key == invoice_key)
        .cloned(),
    )
  }

  async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>> {
    Ok(self.data.read().await.shipments.get(&id).cloned())
  }

  async fn save_shipment(&self, mut shipment: Shipment) -> Result<Shipment> {
    let mut data = self.data.write().await;
    if shipment.id == 0 {
      shipment.id = data.next_id();
    }
    data.shipments.insert(shipment.id, shipment.clone());
    Ok(shipment)
  }

  async fn set_current_status(&self, shipment_id: i64, status: &str) -> Result<()> {
    let mut data = self.data.write().await;
    let shipment = data
      .shipments
      .get_mut(&shipment_id)
      .ok_or_else(|| Error::other(format!("shipment {shipment_id} not found")))?;
    shipment.current_status = Some(status.to_string());
    Ok(())
  }
}

#[async_trait]
impl OccurrenceStore for MemoryStore {
  async fn insert_occurrence(&self, occurrence: NewOccurrence) -> Result<InsertOutcome> {
    let mut data = self.data.write().await;
    if let Some(existing) = data
      .dedup
      .get(&occurrence.dedup_key)
      .and_then(|id| data.occurrences.get(id))
    {
      return Ok(InsertOutcome::Duplicate(existing.clone()));
    }
    let id = data.next_id();
    let row = Occurrence::from_new(id, occurrence, Utc::now());
    data.dedup.insert(row.dedup_key.clone(), id);
    data.occurrences.insert(id, row.clone());
    Ok(InsertOutcome::Inserted(row))
  }

  async fn find_occurrence_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Occurrence>> {
    let data = self.data.read().await;
    Ok(
      data
        .dedup
        .get(dedup_key)
        .and_then(|id| data.occurrences.get(id))
        .cloned(),
    )
  }

  async fn latest_occurrence(&self, shipment_id: i64) -> Result<Option<Occurrence>> {
    let occurrences = self.list_occurrences(shipment_id).await?;
    Ok(latest_of(&occurrences).cloned())
  }

  async fn list_occurrences(&self, shipment_id: i64) -> Result<Vec<Occurrence>> {
    let data = self.data.read().await;
    Ok(
      data
        .occurrences
        .values()
        .filter(|o| o.shipment_id == shipment_id)
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl AdminErrorLog for MemoryStore {
  async fn record_admin_error(&self, error: NewAdminError) -> Result<AdminError> {
    let mut data = self.data.write().await;
    let row = AdminError {
      id: data.next_id(),
      codigo: error.codigo,
      mensagem: error.mensagem,
      contexto: error.contexto,
      trace_id: error.trace_id,
      created_at: Utc::now(),
    };
    data.admin_errors.push(row.clone());
    Ok(row)
  }

  async fn list_admin_errors(&self, codigo: Option<&str>) -> Result<Vec<AdminError>> {
    let data = self.data.read().await;
    Ok(
      data
        .admin_errors
        .iter()
        .filter(|e| codigo.map(|c| e.codigo == c).unwrap_or(true))
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl ExecutionLog for MemoryStore {
  async fn start_execution(&self, execution: NewExecution) -> Result<ExecutionRecord> {
    let mut data = self.data.write().await;
    let record = ExecutionRecord {
      id: data.next_id(),
      job_id: execution.job_id,
      schedule_id: execution.schedule_id,
      job_type: execution.job_type,
      status: ExecutionStatus::Running,
      attempt_number: execution.attempt_number,
      request_payload: execution.request_payload,
      response_payload: None,
      error_message: None,
      trace_id: execution.trace_id,
      started_at: Utc::now(),
      finished_at: None,
    };
    data.executions.insert(record.id, record.clone());
    Ok(record)
  }

  async fn finish_execution(
    &self,
    id: i64,
    status: ExecutionStatus,
    response_payload: Option<Value>,
    error_message: Option<String>,
  ) -> Result<()> {
    let mut data = self.data.write().await;
    let record = data
      .executions
      .get_mut(&id)
      .ok_or_else(|| Error::other(format!("execution {id} not found")))?;
    record.status = status;
    record.response_payload = response_payload;
    record.error_message = error_message;
    record.finished_at = Some(Utc::now());
    Ok(())
  }

  async fn list_executions(&self, job_id: &str) -> Result<Vec<ExecutionRecord>> {
    let data = self.data.read().await;
    Ok(
      data
        .executions
        .values()
        .filter(|e| e.job_id.as_deref() == Some(job_id))
        .cloned()
        .collect(),
    )
  }
}
