//! 管理错误实体
//! Administrative error entity

use crate::model::AdminError;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "admin_errors")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub codigo: String,
  #[sea_orm(column_type = "Text")]
  pub mensagem: String,
  #[sea_orm(column_type = "JsonBinary")]
  pub contexto: Json,
  pub trace_id: Option<String>,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for AdminError {
  fn from(model: Model) -> Self {
    Self {
      id: model.id,
      codigo: model.codigo,
      mensagem: model.mensagem,
      contexto: model.contexto,
      trace_id: model.trace_id,
      created_at: model.created_at.into(),
    }
  }
}
