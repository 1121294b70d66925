//! 内存后端
//! Memory backend
//!
//! 不依赖外部服务的队列、锁与数据存储，用于测试和单进程部署
//! Queue, lock and data store without external services, for tests and single-process runs

mod broker;
mod lock;
mod store;

pub use broker::MemoryBroker;
pub use lock::MemoryLockStore;
pub use store::MemoryStore;
