//! 事件实体
//! Occurrence entity

use crate::model::Occurrence;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "occurrences")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub shipment_id: i64,
  pub carrier_id: String,
  pub external_code: String,
  pub internal_occurrence_code: Option<String>,
  pub normalized_status: String,
  #[sea_orm(column_type = "Text", nullable)]
  pub description: Option<String>,
  pub occurred_at: DateTimeWithTimeZone,
  #[sea_orm(column_type = "JsonBinary")]
  pub raw_payload: Json,
  #[sea_orm(unique)]
  pub dedup_key: String,
  pub trace_id: String,
  pub processed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Occurrence {
  fn from(model: Model) -> Self {
    Self {
      id: model.id,
      shipment_id: model.shipment_id,
      carrier_id: model.carrier_id,
      external_code: model.external_code,
      internal_occurrence_code: model.internal_occurrence_code,
      normalized_status: model.normalized_status,
      description: model.description,
      occurred_at: model.occurred_at.into(),
      raw_payload: model.raw_payload,
      dedup_key: model.dedup_key,
      trace_id: model.trace_id,
      processed_at: model.processed_at.into(),
    }
  }
}
