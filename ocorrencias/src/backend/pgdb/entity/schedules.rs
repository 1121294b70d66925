//! 调度定义实体
//! Schedule definition entity

use crate::model::{HttpTarget, ScheduleDefinition};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "schedules")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub name: String,
  pub cron_expression: String,
  /// url、method、headers 与 payload
  /// url, method, headers and payload
  #[sea_orm(column_type = "JsonBinary")]
  pub target: Json,
  pub window_minutes: i64,
  pub carrier_id: Option<String>,
  pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
  pub fn into_definition(self) -> crate::error::Result<ScheduleDefinition> {
    let target: HttpTarget = serde_json::from_value(self.target)?;
    Ok(ScheduleDefinition {
      id: self.id,
      name: self.name,
      cron_expression: self.cron_expression,
      target,
      window_minutes: self.window_minutes,
      carrier_id: self.carrier_id,
      active: self.active,
    })
  }
}
