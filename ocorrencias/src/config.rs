//! 配置模块
//! Configuration module
//!
//! 从环境变量读取运行配置
//! Runtime configuration read from the environment
//!
//! | 变量 / Variable | 默认 / Default |
//! |---|---|
//! | `OCORRENCIAS_BACKEND` | `postgres` |
//! | `DATABASE_URL` | - |
//! | `REDIS_URL` | - |
//! | `OCORRENCIAS_ADDR` | `127.0.0.1:8080` |
//! | `WORKER_CONCURRENCY` | `type=n,type=n` |
//! | `WORKER_CONCURRENCY_DEFAULT` | `1` |
//! | `JOB_DEFAULT_ATTEMPTS` | `3` |
//! | `JOB_DEFAULT_BACKOFF_MS` | `1000` |
//! | `LOCK_DEFAULT_TTL_MINUTES` | `1` |
//! | `SCHEDULER_TICK_SECS` | `60` |
//! | `HTTP_TIMEOUT_SECS` | `30` |
//! | `JOB_RETENTION_HOURS` | `24` |
//! | `DB_MAX_CONNECTIONS` | 并发总数 + 4 / total concurrency + 4 |

use crate::base::constants::{
  DEFAULT_ATTEMPTS, DEFAULT_BACKOFF_BASE, DEFAULT_HTTP_TIMEOUT, DEFAULT_JOB_TIMEOUT,
  DEFAULT_TICK_INTERVAL, DEFAULT_WORKER_CONCURRENCY, MAX_WORKER_CONCURRENCY,
};
use crate::error::{Error, Result};
use crate::job::{Backoff, JobOptions};
use crate::registry::JobRegistry;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// 存储后端类型
/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
  Postgres,
  Memory,
}

impl FromStr for BackendKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
      "memory" | "mem" => Ok(BackendKind::Memory),
      other => Err(Error::config(format!(
        "invalid OCORRENCIAS_BACKEND: {other}, use 'postgres' or 'memory'"
      ))),
    }
  }
}

/// 运行配置
/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
  pub backend: BackendKind,
  pub database_url: Option<String>,
  /// 设置后锁存储使用 Redis
  /// When set the lock store lives in Redis
  pub redis_url: Option<String>,
  /// HTTP 监听地址
  /// HTTP bind address
  pub addr: String,
  /// 每种作业类型的并发数
  /// Per job type concurrency
  pub worker_concurrency: BTreeMap<String, usize>,
  pub default_concurrency: usize,
  pub job_attempts: u32,
  pub job_backoff_base: Duration,
  /// 调度未设置窗口时的锁时长
  /// Lock lifetime when a schedule has no window
  pub lock_ttl_minutes: i64,
  pub tick_interval: Duration,
  pub http_timeout: Duration,
  pub job_timeout: Duration,
  pub poll_interval: Duration,
  pub shutdown_timeout: Duration,
  pub sync_interval: Duration,
  pub janitor_interval: Duration,
  /// 已完成作业的保留时长
  /// Retention of completed jobs
  pub job_retention: Duration,
  pub db_max_connections: Option<u32>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backend: BackendKind::Postgres,
      database_url: None,
      redis_url: None,
      addr: "127.0.0.1:8080".to_string(),
      worker_concurrency: BTreeMap::new(),
      default_concurrency: DEFAULT_WORKER_CONCURRENCY,
      job_attempts: DEFAULT_ATTEMPTS,
      job_backoff_base: DEFAULT_BACKOFF_BASE,
      lock_ttl_minutes: 1,
      tick_interval: DEFAULT_TICK_INTERVAL,
      http_timeout: DEFAULT_HTTP_TIMEOUT,
      job_timeout: DEFAULT_JOB_TIMEOUT,
      poll_interval: Duration::from_millis(500),
      shutdown_timeout: Duration::from_secs(10),
      sync_interval: Duration::from_secs(60),
      janitor_interval: Duration::from_secs(300),
      job_retention: Duration::from_secs(24 * 3600),
      db_max_connections: None,
    }
  }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
  value
    .trim()
    .parse()
    .map_err(|_| Error::config(format!("invalid value for {name}: {value}")))
}

/// 解析 `type=n,type=n`
/// Parse `type=n,type=n`
pub fn parse_concurrency(value: &str) -> Result<BTreeMap<String, usize>> {
  let mut out = BTreeMap::new();
  for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
    let (job_type, n) = part
      .split_once('=')
      .ok_or_else(|| Error::config(format!("invalid WORKER_CONCURRENCY entry: {part}")))?;
    out.insert(
      job_type.trim().to_string(),
      parse_var::<usize>("WORKER_CONCURRENCY", n)?,
    );
  }
  Ok(out)
}

impl Config {
  pub fn new() -> Self {
    Self::default()
  }

  /// 从进程环境读取
  /// Read from the process environment
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// 从任意查找函数读取
  /// Read through any lookup function
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();
    if let Some(v) = lookup("OCORRENCIAS_BACKEND") {
      config.backend = v.parse()?;
    }
    config.database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
    config.redis_url = lookup("REDIS_URL").filter(|v| !v.trim().is_empty());
    if let Some(v) = lookup("OCORRENCIAS_ADDR") {
      config.addr = v;
    }
    if let Some(v) = lookup("WORKER_CONCURRENCY") {
      config.worker_concurrency = parse_concurrency(&v)?;
    }
    if let Some(v) = lookup("WORKER_CONCURRENCY_DEFAULT") {
      config.default_concurrency = parse_var("WORKER_CONCURRENCY_DEFAULT", &v)?;
    }
    if let Some(v) = lookup("JOB_DEFAULT_ATTEMPTS") {
      config.job_attempts = parse_var("JOB_DEFAULT_ATTEMPTS", &v)?;
    }
    if let Some(v) = lookup("JOB_DEFAULT_BACKOFF_MS") {
      config.job_backoff_base = Duration::from_millis(parse_var("JOB_DEFAULT_BACKOFF_MS", &v)?);
    }
    if let Some(v) = lookup("LOCK_DEFAULT_TTL_MINUTES") {
      config.lock_ttl_minutes = parse_var("LOCK_DEFAULT_TTL_MINUTES", &v)?;
    }
    if let Some(v) = lookup("SCHEDULER_TICK_SECS") {
      config.tick_interval = Duration::from_secs(parse_var("SCHEDULER_TICK_SECS", &v)?);
    }
    if let Some(v) = lookup("HTTP_TIMEOUT_SECS") {
      config.http_timeout = Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", &v)?);
    }
    if let Some(v) = lookup("JOB_RETENTION_HOURS") {
      config.job_retention = Duration::from_secs(parse_var::<u64>("JOB_RETENTION_HOURS", &v)? * 3600);
    }
    if let Some(v) = lookup("DB_MAX_CONNECTIONS") {
      config.db_max_connections = Some(parse_var("DB_MAX_CONNECTIONS", &v)?);
    }
    config.validate()?;
    Ok(config)
  }

  /// 设置后端
  /// Set the backend
  pub fn backend(mut self, backend: BackendKind) -> Self {
    self.backend = backend;
    self
  }

  pub fn database_url<S: Into<String>>(mut self, url: S) -> Self {
    self.database_url = Some(url.into());
    self
  }

  pub fn redis_url<S: Into<String>>(mut self, url: S) -> Self {
    self.redis_url = Some(url.into());
    self
  }

  /// 设置某个作业类型的并发数
  /// Set the concurrency of one job type
  pub fn concurrency<S: Into<String>>(mut self, job_type: S, concurrency: usize) -> Self {
    self.worker_concurrency.insert(job_type.into(), concurrency);
    self
  }

  pub fn job_attempts(mut self, attempts: u32) -> Self {
    self.job_attempts = attempts.max(1);
    self
  }

  pub fn job_backoff_base(mut self, base: Duration) -> Self {
    self.job_backoff_base = base;
    self
  }

  pub fn tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  pub fn http_timeout(mut self, timeout: Duration) -> Self {
    self.http_timeout = timeout;
    self
  }

  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// 校验配置
  /// Validate the configuration
  pub fn validate(&self) -> Result<()> {
    if self.backend == BackendKind::Postgres && self.database_url.is_none() {
      return Err(Error::config("DATABASE_URL is required for the postgres backend"));
    }
    let concurrency_ok = |n: &usize| (1..=MAX_WORKER_CONCURRENCY).contains(n);
    if !concurrency_ok(&self.default_concurrency) {
      return Err(Error::config(format!(
        "WORKER_CONCURRENCY_DEFAULT must be between 1 and {MAX_WORKER_CONCURRENCY}"
      )));
    }
    if let Some((job_type, n)) = self.worker_concurrency.iter().find(|(_, n)| !concurrency_ok(n)) {
      return Err(Error::config(format!(
        "concurrency {n} for {job_type} must be between 1 and {MAX_WORKER_CONCURRENCY}"
      )));
    }
    if self.job_attempts == 0 {
      return Err(Error::config("JOB_DEFAULT_ATTEMPTS must be at least 1"));
    }
    if self.lock_ttl_minutes < 1 {
      return Err(Error::config("LOCK_DEFAULT_TTL_MINUTES must be at least 1"));
    }
    if self.tick_interval.is_zero() {
      return Err(Error::config("SCHEDULER_TICK_SECS must be positive"));
    }
    Ok(())
  }

  pub fn concurrency_for(&self, job_type: &str) -> usize {
    self
      .worker_concurrency
      .get(job_type)
      .copied()
      .unwrap_or(self.default_concurrency)
  }

  /// 把并发设置写入注册表
  /// Apply the concurrency settings to a registry
  pub fn apply_concurrency(&self, registry: &mut JobRegistry) {
    for job_type in registry.job_types() {
      let n = self.concurrency_for(&job_type);
      registry.set_concurrency(&job_type, n);
    }
  }

  /// 入队的默认选项
  /// Default enqueue options
  pub fn job_options(&self) -> JobOptions {
    JobOptions::default()
      .with_attempts(self.job_attempts)
      .with_backoff(Backoff::Exponential(self.job_backoff_base))
  }

  /// 连接池大小：显式设置优先，否则为所有类型并发之和加 4
  /// Pool size: the explicit setting wins, otherwise the summed concurrency plus 4
  pub fn max_connections(&self, job_types: &[String]) -> u32 {
    self.db_max_connections.unwrap_or_else(|| {
      let total: usize = job_types.iter().map(|t| self.concurrency_for(t)).sum();
      (total + 4) as u32
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name| map.get(name).cloned()
  }

  #[test]
  fn test_config_from_lookup() {
    let config = Config::from_lookup(lookup(&[
      ("OCORRENCIAS_BACKEND", "memory"),
      ("WORKER_CONCURRENCY", "run-agendamento=3, process-webhook=2"),
      ("JOB_DEFAULT_ATTEMPTS", "5"),
      ("JOB_DEFAULT_BACKOFF_MS", "250"),
      ("SCHEDULER_TICK_SECS", "30"),
    ]))
    .unwrap();
    assert_eq!(config.backend, BackendKind::Memory);
    assert_eq!(config.concurrency_for("run-agendamento"), 3);
    assert_eq!(config.concurrency_for("other"), 1);
    assert_eq!(config.job_attempts, 5);
    assert_eq!(config.job_backoff_base, Duration::from_millis(250));
    assert_eq!(config.tick_interval, Duration::from_secs(30));
    assert_eq!(config.addr, "127.0.0.1:8080");

    let types = vec!["run-agendamento".to_string(), "process-webhook".to_string()];
    assert_eq!(config.max_connections(&types), 9);

    let options = config.job_options();
    assert_eq!(options.attempts, 5);
    assert_eq!(options.backoff.delay(2), Duration::from_millis(1000));
  }

  #[test]
  fn test_config_rejects_bad_values() {
    assert!(Config::from_lookup(lookup(&[])).is_err());
    assert!(Config::from_lookup(lookup(&[
      ("OCORRENCIAS_BACKEND", "memory"),
      ("WORKER_CONCURRENCY", "run-agendamento=9"),
    ]))
    .is_err());
    assert!(Config::from_lookup(lookup(&[
      ("OCORRENCIAS_BACKEND", "memory"),
      ("JOB_DEFAULT_ATTEMPTS", "abc"),
    ]))
    .is_err());
    assert!(Config::from_lookup(lookup(&[("OCORRENCIAS_BACKEND", "sqlite")])).is_err());
  }

  #[test]
  fn test_parse_concurrency() {
    let parsed = parse_concurrency("a=1,b=2,").unwrap();
    assert_eq!(parsed.get("a"), Some(&1));
    assert_eq!(parsed.get("b"), Some(&2));
    assert!(parse_concurrency("a").is_err());
  }
}
