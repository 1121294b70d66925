//! Ocorrencias server binary

use ocorrencias::config::Config;
use ocorrencias_server::OcorrenciasServer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(
      EnvFilter::from_default_env()
        .add_directive("ocorrencias=info".parse()?)
        .add_directive("ocorrencias_server=info".parse()?),
    )
    .init();

  let config = Config::from_env()?;
  info!(
    backend = ?config.backend,
    redis_locks = config.redis_url.is_some(),
    "Starting ocorrencias-server on {}",
    config.addr
  );

  let server = OcorrenciasServer::new(config).await?;
  server.run().await?;

  Ok(())
}
