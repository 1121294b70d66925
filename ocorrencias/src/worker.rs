//! 工作者池模块
//! Worker pool module
//!
//! 为注册表中的每种作业类型启动一个处理器，并托管后台组件的生命周期。
//! 不同类型的处理器互不共享状态，只共享队列与数据库连接池。
//!
//! Starts one processor per registered job type and owns the lifecycle of background
//! components. Processors of different types share only the queue and the database pool.

use crate::base::Store;
use crate::components::processor::{Processor, ProcessorParams};
use crate::components::ComponentLifecycle;
use crate::error::{Error, Result};
use crate::queue::Queue;
use crate::registry::JobRegistry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 工作者池配置
/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// 队列空闲时的轮询间隔
  /// Poll interval while the queue is idle
  pub poll_interval: Duration,
  /// 单个作业的超时
  /// Per-job timeout
  pub job_timeout: Duration,
  /// 关闭时等待运行中作业的时长
  /// How long shutdown waits for running jobs
  pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(500),
      job_timeout: crate::base::constants::DEFAULT_JOB_TIMEOUT,
      shutdown_timeout: Duration::from_secs(10),
    }
  }
}

impl From<&crate::config::Config> for WorkerConfig {
  fn from(config: &crate::config::Config) -> Self {
    Self {
      poll_interval: config.poll_interval,
      job_timeout: config.job_timeout,
      shutdown_timeout: config.shutdown_timeout,
    }
  }
}

/// 池状态
/// Pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
  New,
  Running,
  Closed,
}

type ComponentEntry = (Arc<dyn ComponentLifecycle + Send + Sync>, JoinHandle<()>);

pub struct WorkerPool {
  state: PoolState,
  queue: Queue,
  store: Arc<dyn Store>,
  registry: Arc<JobRegistry>,
  config: WorkerConfig,
  processors: Vec<Processor>,
  components: Vec<ComponentEntry>,
}

impl WorkerPool {
  pub fn new(
    queue: Queue,
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    config: WorkerConfig,
  ) -> Self {
    Self {
      state: PoolState::New,
      queue,
      store,
      registry,
      config,
      processors: Vec::new(),
      components: Vec::new(),
    }
  }

  pub fn state(&self) -> PoolState {
    self.state
  }

  /// 启动所有处理器
  /// Start every processor
  pub fn start(&mut self) -> Result<()> {
    if self.state != PoolState::New {
      return Err(Error::other("worker pool already started"));
    }
    self.state = PoolState::Running;

    for job_type in self.registry.job_types() {
      let concurrency = self.registry.concurrency(&job_type);
      let mut processor = Processor::new(ProcessorParams {
        job_type: job_type.clone(),
        queue: self.queue.clone(),
        store: self.store.clone(),
        handler: self.registry.clone(),
        concurrency,
        poll_interval: self.config.poll_interval,
        job_timeout: self.config.job_timeout,
        shutdown_timeout: self.config.shutdown_timeout,
      });
      processor.start();
      tracing::info!(job_type = %job_type, concurrency, "Processor started");
      self.processors.push(processor);
    }
    Ok(())
  }

  /// 启动并托管一个后台组件
  /// Start and own a background component
  pub fn spawn_component<C>(&mut self, component: Arc<C>)
  where
    C: ComponentLifecycle + Send + Sync + 'static,
  {
    let handle = component.clone().start();
    self
      .components
      .push((component as Arc<dyn ComponentLifecycle + Send + Sync>, handle));
  }

  /// 正在运行的作业总数
  /// Total jobs currently running
  pub fn active_workers(&self) -> usize {
    self.processors.iter().map(|p| p.active_workers()).sum()
  }

  /// 先停组件，再等待处理器排空
  /// Stop components first, then drain the processors
  pub async fn shutdown(&mut self) {
    if self.state == PoolState::Closed {
      return;
    }
    self.state = PoolState::Closed;

    for (component, handle) in self.components.drain(..) {
      component.shutdown();
      handle.abort();
      let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    join_all(self.processors.iter_mut().map(|p| p.shutdown())).await;
    tracing::info!("Worker pool stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memdb::{MemoryBroker, MemoryStore};
  use crate::components::janitor::{Janitor, JanitorConfig};
  use crate::job::{JobInfo, JobOptions, JobStatus};
  use serde_json::{json, Value};

  #[tokio::test]
  async fn test_pool_runs_each_type() {
    let mut registry = JobRegistry::new();
    registry.handle_async_func("a", |_job: JobInfo| async move { Ok(Value::Null) });
    registry.handle_async_func("b", |_job: JobInfo| async move { Ok(Value::Null) });
    let registry = Arc::new(registry);
    let broker = Arc::new(MemoryBroker::new());
    let queue = Queue::new(broker.clone(), registry.job_types());
    queue.enqueue("a", json!({}), JobOptions::default()).await.unwrap();
    queue.enqueue("b", json!({}), JobOptions::default()).await.unwrap();

    let mut pool = WorkerPool::new(
      queue,
      Arc::new(MemoryStore::new()),
      registry,
      WorkerConfig {
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(1),
        shutdown_timeout: Duration::from_secs(1),
      },
    );
    pool.start().unwrap();
    assert!(pool.start().is_err());
    pool.spawn_component(Arc::new(Janitor::new(broker.clone(), JanitorConfig::default())));

    tokio::time::sleep(Duration::from_millis(150)).await;
    pool.shutdown().await;
    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(broker.count(JobStatus::Completed).await, 2);
  }
}
