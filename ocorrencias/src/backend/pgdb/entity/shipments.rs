//! 运单实体
//! Shipment entity

use crate::model::Shipment;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  #[sea_orm(unique)]
  pub invoice_key: String,
  pub carrier_id: Option<String>,
  pub current_status: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Shipment {
  fn from(model: Model) -> Self {
    Self {
      id: model.id,
      invoice_key: model.invoice_key,
      carrier_id: model.carrier_id,
      current_status: model.current_status,
    }
  }
}
