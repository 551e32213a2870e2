//! 日志初始化
//!
//! 配置tracing日志框架。`RUST_LOG` 环境变量优先于配置文件中的级别。

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
///
/// 可重复调用：全局订阅者已存在时直接返回 `false`。
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !config.log_to_console {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(target: "binding", level = config.level.as_filter(), "Logging initialized");
    }
    installed
}
