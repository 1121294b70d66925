//! DLQ replay binary
//!
//! ```text
//! dlq-replay --name run-agendamento --inicio 2024-03-01 --fim 2024-03-07 --transportadora jadlog
//! ```

use clap::Parser;
use ocorrencias::backend::Backend;
use ocorrencias::config::Config;
use ocorrencias::inspector::Inspector;
use ocorrencias::registry::JobRegistry;
use ocorrencias_server::replay::{execute, ReplayArgs};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args = ReplayArgs::parse();

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(
      EnvFilter::from_default_env()
        .add_directive("ocorrencias=info".parse()?)
        .add_directive("ocorrencias_server=info".parse()?),
    )
    .init();

  let config = Config::from_env()?;
  config.validate()?;
  let backend = Backend::connect(&config, &JobRegistry::default_job_types()).await?;
  let inspector = Inspector::new(backend.broker);

  let ids = execute(&args, &inspector).await?;
  if args.dry_run {
    info!(matched = ids.len(), "Dry run, nothing replayed");
  } else {
    info!(replayed = ids.len(), "DLQ replay finished");
  }
  Ok(())
}
