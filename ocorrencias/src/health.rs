//! 队列健康检查
//! Queue health
//!
//! 比较数据库里激活的调度与队列后端登记的周期条目，用来发现漂移
//! Compares the active schedules in the database with the repeatable entries in the queue
//! backend to detect drift

use crate::base::{Broker, ScheduleStore};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 健康报告
/// Health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHealth {
  /// 激活的调度数量
  /// Number of active schedules
  pub ativos: usize,
  /// 已登记的周期条目数量
  /// Number of registered repeatables
  pub repeatables: usize,
  /// 激活但没有周期条目的调度键
  /// Active schedules with no repeatable entry
  pub faltando: Vec<String>,
  /// 没有对应激活调度的周期条目键
  /// Repeatable entries with no active schedule
  pub sobrando: Vec<String>,
}

impl QueueHealth {
  pub fn is_consistent(&self) -> bool {
    self.faltando.is_empty() && self.sobrando.is_empty()
  }
}

pub async fn queue_health<S, B>(store: &S, broker: &B) -> Result<QueueHealth>
where
  S: ScheduleStore + ?Sized,
  B: Broker + ?Sized,
{
  let active: BTreeSet<String> = store
    .active_schedules()
    .await?
    .iter()
    .map(|s| s.repeatable_key())
    .collect();
  let registered: BTreeSet<String> = broker
    .list_repeatables()
    .await?
    .into_iter()
    .map(|e| e.key)
    .collect();

  Ok(QueueHealth {
    ativos: active.len(),
    repeatables: registered.len(),
    faltando: active.difference(&registered).cloned().collect(),
    sobrando: registered.difference(&active).cloned().collect(),
  })
}
