//! DLQ replay command
//!
//! Filters dead jobs and puts them back on the queue, printing each replayed id.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use ocorrencias::inspector::{parse_date_bound, DlqFilter, Inspector};

/// Replay dead-lettered jobs.
#[derive(Debug, Parser)]
#[command(name = "dlq-replay", version, about = "Replay jobs from the dead-letter queue")]
pub struct ReplayArgs {
  /// Only jobs of this type (e.g. run-agendamento).
  #[arg(long)]
  pub name: Option<String>,

  /// Only jobs enqueued on this day (YYYY-MM-DD).
  #[arg(long, conflicts_with_all = ["inicio", "fim"])]
  pub date: Option<NaiveDate>,

  /// Enqueued at or after (YYYY-MM-DD or RFC 3339).
  #[arg(long)]
  pub inicio: Option<String>,

  /// Enqueued at or before (YYYY-MM-DD or RFC 3339).
  #[arg(long)]
  pub fim: Option<String>,

  /// Only jobs for this carrier.
  #[arg(long)]
  pub transportadora: Option<String>,

  /// List matching jobs without replaying them.
  #[arg(long)]
  pub dry_run: bool,
}

impl ReplayArgs {
  /// Build the DLQ filter described by the arguments
  pub fn filter(&self) -> Result<DlqFilter> {
    let mut filter = DlqFilter::new();
    if let Some(name) = &self.name {
      filter = filter.with_name(name);
    }
    if let Some(carrier) = &self.transportadora {
      filter = filter.with_carrier(carrier);
    }
    if let Some(date) = self.date {
      filter = filter.on_date(date);
    } else if self.inicio.is_some() || self.fim.is_some() {
      let from = self
        .inicio
        .as_deref()
        .map(|v| parse_date_bound(v, false))
        .transpose()
        .context("invalid --inicio")?;
      let to = self
        .fim
        .as_deref()
        .map(|v| parse_date_bound(v, true))
        .transpose()
        .context("invalid --fim")?;
      filter = filter.between(from, to);
    }
    Ok(filter)
  }
}

/// Execute the replay, returning the ids that were (or would be) replayed.
pub async fn execute(args: &ReplayArgs, inspector: &Inspector) -> Result<Vec<String>> {
  let filter = args.filter()?;
  let ids = if args.dry_run {
    inspector
      .list_dead(&filter)
      .await?
      .into_iter()
      .map(|job| job.id)
      .collect()
  } else {
    inspector.replay(&filter).await?
  };
  for id in &ids {
    println!("{id}");
  }
  Ok(ids)
}
