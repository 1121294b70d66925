//! 周期条目实体
//! Repeatable entry entity

use crate::model::RepeatableEntry;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repeatables")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub key: String,
  pub schedule_id: i64,
  pub cron_expression: String,
  pub registered_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for RepeatableEntry {
  fn from(model: Model) -> Self {
    Self {
      key: model.key,
      schedule_id: model.schedule_id,
      cron_expression: model.cron_expression,
      registered_at: model.registered_at.into(),
    }
  }
}
