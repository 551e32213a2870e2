//! 错误聚合和报告模块
//!
//! 提供错误统计、聚合和导出功能。[`ErrorAggregator`] 本身实现了
//! [`ErrorReporter`]，可以直接注入到脚本控制器中。

use super::error::ScriptError;
use super::reporting::ErrorReporter;
use super::utils::{current_timestamp, lock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// 报告严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportSeverity {
    Message,
    Warning,
    Error,
}

/// 错误统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    /// 错误与警告总数（不含普通信息）
    pub total_count: u64,
    /// 按错误类型分组的计数
    pub by_type: HashMap<String, u64>,
    /// 按报告消息分组的计数
    pub by_source: HashMap<String, u64>,
    /// 最近发生的报告（最多保留N条）
    pub recent: VecDeque<ErrorRecord>,
    /// 最后更新时间戳
    pub last_updated: u64,
}

impl ErrorStats {
    /// 获取最常见的错误类型
    pub fn most_common_error_type(&self) -> Option<(&String, &u64)> {
        self.by_type.iter().max_by_key(|(_, count)| *count)
    }

    /// 获取最常见的错误来源
    pub fn most_common_error_source(&self) -> Option<(&String, &u64)> {
        self.by_source.iter().max_by_key(|(_, count)| *count)
    }
}

/// 错误记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub severity: ReportSeverity,
    /// 错误类型（`Runtime` / `Binding` / `Panicked` / `None`）
    pub error_type: String,
    /// 报告时附带的描述
    pub source: String,
    /// 错误消息
    pub message: String,
    /// 时间戳（秒）
    pub timestamp: u64,
}

/// 错误聚合器
///
/// 线程安全，可以在多个脚本控制器之间共享。
pub struct ErrorAggregator {
    stats: Mutex<ErrorStats>,
    /// 最大保留的记录数
    max_recent: usize,
}

crate::impl_default!(ErrorAggregator {
    stats: Mutex::new(ErrorStats::default()),
    max_recent: 256,
});

impl ErrorAggregator {
    /// 创建新的错误聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带容量配置的错误聚合器
    pub fn with_capacity(max_recent: usize) -> Self {
        Self {
            stats: Mutex::new(ErrorStats::default()),
            max_recent: max_recent.max(1),
        }
    }

    fn record(&self, severity: ReportSeverity, source: &str, error: Option<&ScriptError>) {
        let error_type = error.map_or("None", ScriptError::kind_name).to_string();
        let message = error.map_or_else(|| source.to_string(), ToString::to_string);

        let mut stats = lock(&self.stats);
        if severity != ReportSeverity::Message {
            stats.total_count += 1;
            *stats.by_type.entry(error_type.clone()).or_insert(0) += 1;
            *stats.by_source.entry(source.to_string()).or_insert(0) += 1;
        }

        stats.recent.push_back(ErrorRecord {
            severity,
            error_type,
            source: source.to_string(),
            message,
            timestamp: current_timestamp(),
        });
        while stats.recent.len() > self.max_recent {
            stats.recent.pop_front();
        }
        stats.last_updated = current_timestamp();
    }

    /// 获取错误统计
    pub fn get_stats(&self) -> ErrorStats {
        lock(&self.stats).clone()
    }

    /// 错误总数
    pub fn error_count(&self) -> u64 {
        lock(&self.stats).total_count
    }

    /// 清除所有统计
    pub fn clear(&self) {
        *lock(&self.stats) = ErrorStats::default();
    }

    /// 导出错误报告（JSON格式）
    pub fn export_report(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.get_stats())
    }
}

impl ErrorReporter for ErrorAggregator {
    fn message_report(&self, message: &str) {
        self.record(ReportSeverity::Message, message, None);
    }

    fn warning_report(&self, message: &str, error: Option<&ScriptError>) {
        tracing::warn!(target: "script", "{}", message);
        self.record(ReportSeverity::Warning, message, error);
    }

    fn error_report(&self, message: &str, error: Option<&ScriptError>) {
        tracing::error!(target: "script", "{}", message);
        self.record(ReportSeverity::Error, message, error);
    }
}
