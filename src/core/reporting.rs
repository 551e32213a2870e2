//! 错误报告协作方
//!
//! 监听器和脚本回调的失败不会向上传播，而是逐条交给注入的 [`ErrorReporter`]。
//! 默认实现 [`TracingErrorReporter`] 直接写入 `tracing` 日志；
//! [`ErrorAggregator`](super::ErrorAggregator) 额外做统计。

use super::error::ScriptError;

/// 错误报告接口
pub trait ErrorReporter: Send + Sync {
    /// 普通信息
    fn message_report(&self, message: &str);

    /// 警告：操作继续，但结果可能不完整
    fn warning_report(&self, message: &str, error: Option<&ScriptError>);

    /// 错误：一次回调或分发失败
    fn error_report(&self, message: &str, error: Option<&ScriptError>);
}

/// 基于 tracing 的默认报告器
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn message_report(&self, message: &str) {
        tracing::info!(target: "script", "{}", message);
    }

    fn warning_report(&self, message: &str, error: Option<&ScriptError>) {
        match error {
            Some(err) => tracing::warn!(target: "script", error = %err, "{}", message),
            None => tracing::warn!(target: "script", "{}", message),
        }
    }

    fn error_report(&self, message: &str, error: Option<&ScriptError>) {
        match error {
            Some(err) => tracing::error!(target: "script", error = %err, "{}", message),
            None => tracing::error!(target: "script", "{}", message),
        }
    }
}
