//! Lifecycle 模块
//! Lifecycle module
//!
//! 后台组件的通用生命周期接口
//! Common lifecycle interface for background components

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod janitor;
pub mod processor;
pub mod recoverer;
pub mod schedule_sync;

/// 组件生命周期管理接口
/// Component lifecycle interface
///
/// # 实现者 / Implementors
///
/// - [`Scheduler`](crate::scheduler::Scheduler) - 每个节拍认领窗口并入队分发作业
/// - [`ScheduleSync`](schedule_sync::ScheduleSync) - 把激活的调度同步为周期条目
/// - [`Janitor`](janitor::Janitor) - 清理过期的已完成作业
/// - [`Recoverer`](recoverer::Recoverer) - 回收租约过期的作业
///
/// [`Processor`](processor::Processor) 没有实现此 trait：它的关闭需要等待工作者
/// [`Processor`](processor::Processor) does not implement this trait: its shutdown awaits workers
pub trait ComponentLifecycle {
  /// 启动组件，返回后台任务句柄
  /// Start the component, returning the background task handle
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 发送关闭信号
  /// Signal shutdown
  fn shutdown(&self);

  /// 组件是否已停止
  /// Whether the component has stopped
  fn is_done(&self) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct TestComponent {
    done: Arc<AtomicBool>,
  }

  impl ComponentLifecycle for TestComponent {
    fn start(self: Arc<Self>) -> JoinHandle<()> {
      tokio::spawn(async move {
        while !self.done.load(Ordering::Relaxed) {
          tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
      })
    }

    fn shutdown(&self) {
      self.done.store(true, Ordering::Relaxed);
    }

    fn is_done(&self) -> bool {
      self.done.load(Ordering::Relaxed)
    }
  }

  #[tokio::test]
  async fn test_lifecycle_trait() {
    let component = Arc::new(TestComponent {
      done: Arc::new(AtomicBool::new(false)),
    });
    assert!(!component.is_done());
    let handle = component.clone().start();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    component.shutdown();
    assert!(component.is_done());
    handle.await.unwrap();
  }
}
