//! 承运商代码映射实体
//! Carrier code mapping entity

use crate::model::CarrierCodeMapping;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "carrier_code_mappings")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub carrier_id: String,
  pub external_code: String,
  pub internal_occurrence_code: String,
  pub normalized_status: String,
  pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for CarrierCodeMapping {
  fn from(model: Model) -> Self {
    Self {
      id: model.id,
      carrier_id: model.carrier_id,
      external_code: model.external_code,
      internal_occurrence_code: model.internal_occurrence_code,
      normalized_status: model.normalized_status,
      active: model.active,
    }
  }
}
