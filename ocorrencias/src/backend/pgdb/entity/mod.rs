//! SeaORM 实体模块
//! SeaORM entity module
//!
//! 定义了与 PostgresSQL 表对应的实体模型
//! Defines entity models corresponding to PostgresSQL tables

pub mod admin_errors;
pub mod carrier_code_mappings;
pub mod execution_records;
pub mod jobs;
pub mod locks;
pub mod occurrences;
pub mod prelude;
pub mod repeatables;
pub mod schedules;
pub mod shipments;

pub use prelude::*;
