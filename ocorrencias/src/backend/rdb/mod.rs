//! Redis 后端
//! Redis backend
//!
//! 只提供锁存储；作业仍然落在 PostgresSQL 或内存队列中
//! Provides only the lock store; jobs still live in PostgresSQL or the in-memory queue

mod lock;

pub use lock::RedisLockStore;
