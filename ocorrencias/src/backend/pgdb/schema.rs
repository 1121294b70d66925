//! 数据库 schema 初始化
//! Database schema initialization

use crate::backend::pgdb::entity::{
  AdminErrors, CarrierCodeMappings, ExecutionRecords, Jobs, Locks, Occurrences, Repeatables,
  Schedules, Shipments,
};
use crate::error::Result;
use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{ConnectionTrait, DatabaseConnection, Schema};

/// 从实体建表并创建索引；已存在的对象保持不变
/// Create tables from entities plus indexes; existing objects are left as they are
pub async fn init_schema(db: &DatabaseConnection) -> Result<()> {
  let backend = db.get_database_backend();
  let schema = Schema::new(backend);

  let tables: Vec<TableCreateStatement> = vec![
    schema.create_table_from_entity(Jobs),
    schema.create_table_from_entity(Repeatables),
    schema.create_table_from_entity(Locks),
    schema.create_table_from_entity(Schedules),
    schema.create_table_from_entity(ExecutionRecords),
    schema.create_table_from_entity(CarrierCodeMappings),
    schema.create_table_from_entity(Shipments),
    schema.create_table_from_entity(Occurrences),
    schema.create_table_from_entity(AdminErrors),
  ];
  for mut stmt in tables {
    db.execute(backend.build(stmt.if_not_exists())).await?;
  }

  // SeaORM 的 schema 没有索引 API，使用原始 SQL；旧的 jobs 表补上租约列
  // SeaORM's schema helper has no index API, use raw SQL; older jobs tables get the lease column
  let index_sql = r#"
    ALTER TABLE jobs ADD COLUMN IF NOT EXISTS lease_until TIMESTAMPTZ;
    CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(lease_until) WHERE state = 'active';
    CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(job_type, process_at) WHERE state IN ('waiting', 'failed');
    CREATE INDEX IF NOT EXISTS idx_jobs_dead ON jobs(job_type, enqueued_at) WHERE state = 'dead';
    CREATE INDEX IF NOT EXISTS idx_jobs_completed ON jobs(finished_at) WHERE state = 'completed';
    CREATE INDEX IF NOT EXISTS idx_locks_expires_at ON locks(expires_at);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_mappings_active ON carrier_code_mappings(carrier_id, external_code) WHERE active;
    CREATE INDEX IF NOT EXISTS idx_occurrences_latest ON occurrences(shipment_id, occurred_at DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_execution_records_job_id ON execution_records(job_id);
    CREATE INDEX IF NOT EXISTS idx_admin_errors_codigo ON admin_errors(codigo);
  "#;
  for sql in index_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
    db.execute(sea_orm::Statement::from_string(backend, sql))
      .await?;
  }
  Ok(())
}
