//! 运单状态投影
//! Shipment status projector
//!
//! 运单的 `current_status` 总是等于 `occurred_at` 最新的事件的归一化状态
//! A shipment's `current_status` always equals the normalized status of its latest occurrence

use crate::base::Store;
use crate::error::Result;
use crate::model::Occurrence;
use std::sync::Arc;

/// 选出 `occurred_at` 最大的事件，相同时取最大 id
/// Pick the occurrence with the greatest `occurred_at`, highest id on ties
pub fn latest_of(occurrences: &[Occurrence]) -> Option<&Occurrence> {
  occurrences
    .iter()
    .max_by(|a, b| (a.occurred_at, a.id).cmp(&(b.occurred_at, b.id)))
}

#[derive(Clone)]
pub struct Projector {
  store: Arc<dyn Store>,
}

impl Projector {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  /// 根据全部事件重新计算运单状态；可重复调用
  /// Recompute the shipment status from its full occurrence set; safe to repeat
  pub async fn project(&self, shipment_id: i64) -> Result<Option<String>> {
    let Some(latest) = self.store.latest_occurrence(shipment_id).await? else {
      return Ok(None);
    };
    self
      .store
      .set_current_status(shipment_id, &latest.normalized_status)
      .await?;
    tracing::debug!(
      shipment_id,
      occurrence_id = latest.id,
      status = %latest.normalized_status,
      "Shipment status projected"
    );
    Ok(Some(latest.normalized_status))
  }
}
