use std::time::Duration;

/// 调度作业类型
/// Job type emitted by the scheduler for each claimed window
pub const JOB_RUN_AGENDAMENTO: &str = "run-agendamento";

/// 入站 webhook 作业类型
/// Job type carrying an inbound carrier webhook body
pub const JOB_PROCESS_WEBHOOK: &str = "process-webhook";

/// 默认最大尝试次数
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// 默认退避基数
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// 调度器默认节拍
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// 外部 HTTP 调用超时
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// 单个作业的处理上限（包含 HTTP 调用与摄取）
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// 租约超出作业超时的余量
pub const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Recoverer 的扫描间隔
pub const DEFAULT_RECOVER_INTERVAL: Duration = Duration::from_secs(10);

pub const DEFAULT_WORKER_CONCURRENCY: usize = 1;
pub const MAX_WORKER_CONCURRENCY: usize = 5;

/// 未映射代码的归一化状态
pub const STATUS_UNKNOWN: &str = "unknown";

/// 缺失映射的管理错误代码
pub const MAPEAMENTO_INEXISTENTE: &str = "MAPEAMENTO_INEXISTENTE";

/// 版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
