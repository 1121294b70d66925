//! 错误处理模块
//! Error handling module
//!
//! 定义了作业队列、调度器与事件摄取中使用的错误类型
//! Defines the error types used by the job queue, the scheduler and event ingestion

use thiserror::Error;

/// 库的结果类型
/// Result type for the library
pub type Result<T> = std::result::Result<T, Error>;

/// 错误类型
/// Error type
#[derive(Error, Debug)]
pub enum Error {
  /// Redis connection error
  #[error("Redis connection error: {0}")]
  Redis(#[from] redis::RedisError),

  /// SeaORM 数据库错误
  /// SeaORM database error
  #[error("Database error: {0}")]
  SeaOrm(#[from] sea_orm::DbErr),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// HTTP 传输错误
  /// HTTP transport error
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  /// 目标返回了非 2xx 状态
  /// Target answered with a non-2xx status
  #[error("HTTP target answered {status}: {body}")]
  HttpStatus { status: u16, body: String },

  /// 作业 ID 冲突
  /// Job ID conflicts with another job
  #[error("Job ID conflicts with another job")]
  JobIdConflict,

  /// 作业未找到
  /// Job not found
  #[error("Job not found: {id}")]
  JobNotFound { id: String },

  /// 未注册的作业类型
  /// Job type without a registered handler
  #[error("Unknown job type: {job_type}")]
  UnknownJobType { job_type: String },

  /// 调度定义未找到
  /// Schedule definition not found
  #[error("Schedule not found: {id}")]
  ScheduleNotFound { id: i64 },

  /// 无效的 cron 表达式
  /// Invalid cron expression
  #[error("Invalid cron expression '{expression}': {reason}")]
  InvalidCron { expression: String, reason: String },

  /// 无效的作业负载
  /// Invalid job payload
  #[error("Invalid payload: {0}")]
  InvalidPayload(String),

  /// 队列错误
  /// Queue error
  #[error("Queue error: {message}")]
  Queue { message: String },

  /// 超时错误
  /// Timeout error
  #[error("Operation timeout")]
  Timeout,

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建队列错误
  /// Create a queue error
  pub fn queue<S: Into<String>>(message: S) -> Self {
    Self::Queue {
      message: message.into(),
    }
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  pub fn unknown_job_type<S: Into<String>>(job_type: S) -> Self {
    Self::UnknownJobType {
      job_type: job_type.into(),
    }
  }

  /// 检查是否值得重试：远端 429/5xx、超时、连接与存储问题，以及未分类的错误。
  /// 输入不合法、调度缺失或远端 4xx 等永久错误返回 `false`，作业直接进入死信队列
  ///
  /// Whether a retry can help: remote 429/5xx, timeouts, connectivity and storage problems,
  /// and unclassified errors. Permanent errors such as invalid input, a missing schedule or a
  /// remote 4xx return `false` and the job goes straight to the DLQ
  pub fn is_retriable(&self) -> bool {
    match self {
      Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
      Error::Http(e) => !e.is_builder(),
      Error::Redis(_)
      | Error::SeaOrm(_)
      | Error::Io(_)
      | Error::Timeout
      | Error::Queue { .. }
      | Error::Other { .. } => true,
      Error::Serialization(_)
      | Error::JobIdConflict
      | Error::JobNotFound { .. }
      | Error::UnknownJobType { .. }
      | Error::ScheduleNotFound { .. }
      | Error::InvalidCron { .. }
      | Error::InvalidPayload(_)
      | Error::Config { .. } => false,
    }
  }
}
