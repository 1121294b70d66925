//! PostgresSQL 后端
//! PostgresSQL backend
//!
//! 基于 SeaORM 的队列、锁与数据存储
//! Queue, lock store and data store on top of SeaORM

mod broker;
pub mod entity;
mod lock;
mod schema;
mod store;

pub use broker::PostgresBroker;
pub use lock::PostgresLockStore;
pub use schema::init_schema;
pub use store::PostgresStore;
