//! PostgresSQL 数据存储
//! PostgresSQL data store

use crate::backend::pgdb::entity::{
  admin_errors, carrier_code_mappings, execution_records, occurrences, schedules, shipments,
  AdminErrors, CarrierCodeMappings, ExecutionRecords, Occurrences, Schedules, Shipments,
};
use crate::base::{
  AdminErrorLog, ExecutionLog, MappingStore, OccurrenceStore, ScheduleStore, ShipmentStore,
};
use crate::error::{Error, Result};
use crate::model::{
  AdminError, CarrierCodeMapping, ExecutionRecord, ExecutionStatus, InsertOutcome, NewAdminError,
  NewExecution, NewOccurrence, Occurrence, ScheduleDefinition, Shipment,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter, QueryOrder,
  Set, SqlErr, TransactionTrait,
};
use serde_json::Value;

#[derive(Clone)]
pub struct PostgresStore {
  db: DatabaseConnection,
}

impl PostgresStore {
  pub fn new(db: DatabaseConnection) -> Self {
    Self { db }
  }
}

#[async_trait]
impl ScheduleStore for PostgresStore {
  async fn active_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
    Schedules::find()
      .filter(schedules::Column::Active.eq(true))
      .order_by_asc(schedules::Column::Id)
      .all(&self.db)
      .await?
      .into_iter()
      .map(schedules::Model::into_definition)
      .collect()
  }

  async fn get_schedule(&self, id: i64) -> Result<Option<ScheduleDefinition>> {
    Schedules::find_by_id(id)
      .one(&self.db)
      .await?
      .map(schedules::Model::into_definition)
      .transpose()
  }

  async fn save_schedule(&self, schedule: ScheduleDefinition) -> Result<ScheduleDefinition> {
    schedule.validate()?;
    let model = schedules::ActiveModel {
      id: if schedule.id == 0 { NotSet } else { Set(schedule.id) },
      name: Set(schedule.name.clone()),
      cron_expression: Set(schedule.cron_expression.clone()),
      target: Set(serde_json::to_value(&schedule.target)?),
      window_minutes: Set(schedule.window_minutes),
      carrier_id: Set(schedule.carrier_id.clone()),
      active: Set(schedule.active),
    };
    let saved = if schedule.id == 0 {
      model.insert(&self.db).await?
    } else {
      model.update(&self.db).await?
    };
    saved.into_definition()
  }
}

#[async_trait]
impl MappingStore for PostgresStore {
  async fn find_mapping(
    &self,
    carrier_id: &str,
    external_code: &str,
  ) -> Result<Option<CarrierCodeMapping>> {
    Ok(
      CarrierCodeMappings::find()
        .filter(carrier_code_mappings::Column::CarrierId.eq(carrier_id))
        .filter(carrier_code_mappings::Column::ExternalCode.eq(external_code))
        .filter(carrier_code_mappings::Column::Active.eq(true))
        .one(&self.db)
        .await?
        .map(Into::into),
    )
  }

  async fn save_mapping(&self, mapping: CarrierCodeMapping) -> Result<CarrierCodeMapping> {
    let txn = self.db.begin().await?;
    if mapping.active {
      CarrierCodeMappings::update_many()
        .col_expr(carrier_code_mappings::Column::Active, Expr::value(false))
        .filter(carrier_code_mappings::Column::CarrierId.eq(mapping.carrier_id.clone()))
        .filter(carrier_code_mappings::Column::ExternalCode.eq(mapping.external_code.clone()))
        .filter(carrier_code_mappings::Column::Active.eq(true))
        .filter(carrier_code_mappings::Column::Id.ne(mapping.id))
        .exec(&txn)
        .await?;
    }
    let model = carrier_code_mappings::ActiveModel {
      id: if mapping.id == 0 { NotSet } else { Set(mapping.id) },
      carrier_id: Set(mapping.carrier_id.clone()),
      external_code: Set(mapping.external_code.clone()),
      internal_occurrence_code: Set(mapping.internal_occurrence_code.clone()),
      normalized_status: Set(mapping.normalized_status.clone()),
      active: Set(mapping.active),
    };
    let saved = if mapping.id == 0 {
      model.insert(&txn).await?
    } else {
      model.update(&txn).await?
    };
    txn.commit().await?;
    Ok(saved.into())
  }
}

#[async_trait]
impl ShipmentStore for PostgresStore {
  async fn find_shipment_by_invoice_key(&self, invoice_key: &str) -> Result<Option<Shipment>> {
    Ok(
      Shipments::find()
        .filter(shipments::Column::InvoiceKey.eq(invoice_key))
        .one(&self.db)
        .await?
        .map(Into::into),
    )
  }

  async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>> {
    Ok(Shipments::find_by_id(id).one(&self.db).await?.map(Into::into))
  }

  async fn save_shipment(&self, shipment: Shipment) -> Result<Shipment> {
    let model = shipments::ActiveModel {
      id: if shipment.id == 0 { NotSet } else { Set(shipment.id) },
      invoice_key: Set(shipment.invoice_key.clone()),
      carrier_id: Set(shipment.carrier_id.clone()),
      current_status: Set(shipment.current_status.clone()),
    };
    let saved = if shipment.id == 0 {
      model.insert(&self.db).await?
    } else {
      model.update(&self.db).await?
    };
    Ok(saved.into())
  }

  async fn set_current_status(&self, shipment_id: i64, status: &str) -> Result<()> {
    let result = Shipments::update_many()
      .col_expr(shipments::Column::CurrentStatus, Expr::value(status))
      .filter(shipments::Column::Id.eq(shipment_id))
      .exec(&self.db)
      .await?;
    if result.rows_affected == 0 {
      return Err(Error::other(format!("shipment {shipment_id} not found")));
    }
    Ok(())
  }
}

#[async_trait]
impl OccurrenceStore for PostgresStore {
  async fn find_occurrence_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Occurrence>> {
    Ok(
      Occurrences::find()
        .filter(occurrences::Column::DedupKey.eq(dedup_key))
        .one(&self.db)
        .await?
        .map(Into::into),
    )
  }

  async fn insert_occurrence(&self, occurrence: NewOccurrence) -> Result<InsertOutcome> {
    if let Some(existing) = self.find_occurrence_by_dedup_key(&occurrence.dedup_key).await? {
      return Ok(InsertOutcome::Duplicate(existing));
    }
    let dedup_key = occurrence.dedup_key.clone();
    let model = occurrences::ActiveModel {
      id: NotSet,
      shipment_id: Set(occurrence.shipment_id),
      carrier_id: Set(occurrence.carrier_id),
      external_code: Set(occurrence.external_code),
      internal_occurrence_code: Set(occurrence.internal_occurrence_code),
      normalized_status: Set(occurrence.normalized_status),
      description: Set(occurrence.description),
      occurred_at: Set(occurrence.occurred_at.into()),
      raw_payload: Set(occurrence.raw_payload),
      dedup_key: Set(occurrence.dedup_key),
      trace_id: Set(occurrence.trace_id),
      processed_at: Set(Utc::now().into()),
    };
    match model.insert(&self.db).await {
      Ok(saved) => Ok(InsertOutcome::Inserted(saved.into())),
      // 并发插入同一幂等键
      // Concurrent insert of the same idempotency key
      Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => self
        .find_occurrence_by_dedup_key(&dedup_key)
        .await?
        .map(InsertOutcome::Duplicate)
        .ok_or_else(|| Error::other(format!("occurrence {dedup_key} vanished after conflict"))),
      Err(e) => Err(e.into()),
    }
  }

  async fn latest_occurrence(&self, shipment_id: i64) -> Result<Option<Occurrence>> {
    Ok(
      Occurrences::find()
        .filter(occurrences::Column::ShipmentId.eq(shipment_id))
        .order_by_desc(occurrences::Column::OccurredAt)
        .order_by_desc(occurrences::Column::Id)
        .one(&self.db)
        .await?
        .map(Into::into),
    )
  }

  async fn list_occurrences(&self, shipment_id: i64) -> Result<Vec<Occurrence>> {
    Ok(
      Occurrences::find()
        .filter(occurrences::Column::ShipmentId.eq(shipment_id))
        .order_by_asc(occurrences::Column::OccurredAt)
        .order_by_asc(occurrences::Column::Id)
        .all(&self.db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect(),
    )
  }
}

#[async_trait]
impl AdminErrorLog for PostgresStore {
  async fn record_admin_error(&self, error: NewAdminError) -> Result<AdminError> {
    let model = admin_errors::ActiveModel {
      id: NotSet,
      codigo: Set(error.codigo),
      mensagem: Set(error.mensagem),
      contexto: Set(error.contexto),
      trace_id: Set(error.trace_id),
      created_at: Set(Utc::now().into()),
    };
    Ok(model.insert(&self.db).await?.into())
  }

  async fn list_admin_errors(&self, codigo: Option<&str>) -> Result<Vec<AdminError>> {
    let mut query = AdminErrors::find();
    if let Some(codigo) = codigo {
      query = query.filter(admin_errors::Column::Codigo.eq(codigo));
    }
    Ok(
      query
        .order_by_asc(admin_errors::Column::Id)
        .all(&self.db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect(),
    )
  }
}

#[async_trait]
impl ExecutionLog for PostgresStore {
  async fn start_execution(&self, execution: NewExecution) -> Result<ExecutionRecord> {
    let model = execution_records::ActiveModel {
      id: NotSet,
      job_id: Set(execution.job_id),
      schedule_id: Set(execution.schedule_id),
      job_type: Set(execution.job_type),
      status: Set(ExecutionStatus::Running.as_str().to_string()),
      attempt_number: Set(execution.attempt_number as i32),
      request_payload: Set(execution.request_payload),
      response_payload: Set(None),
      error_message: Set(None),
      trace_id: Set(execution.trace_id),
      started_at: Set(Utc::now().into()),
      finished_at: Set(None),
    };
    model.insert(&self.db).await?.into_record()
  }

  async fn finish_execution(
    &self,
    id: i64,
    status: ExecutionStatus,
    response_payload: Option<Value>,
    error_message: Option<String>,
  ) -> Result<()> {
    let model = ExecutionRecords::find_by_id(id)
      .one(&self.db)
      .await?
      .ok_or_else(|| Error::other(format!("execution {id} not found")))?;
    let mut active: execution_records::ActiveModel = model.into();
    active.status = Set(status.as_str().to_string());
    active.response_payload = Set(response_payload);
    active.error_message = Set(error_message);
    active.finished_at = Set(Some(Utc::now().into()));
    active.update(&self.db).await?;
    Ok(())
  }

  async fn list_executions(&self, job_id: &str) -> Result<Vec<ExecutionRecord>> {
    ExecutionRecords::find()
      .filter(execution_records::Column::JobId.eq(job_id))
      .order_by_asc(execution_records::Column::Id)
      .all(&self.db)
      .await?
      .into_iter()
      .map(execution_records::Model::into_record)
      .collect()
  }
}
