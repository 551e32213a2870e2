//! 核心模块
//!
//! 包含绑定层的基础设施：
//! - `error` - 错误类型定义
//! - `reporting` - 错误报告协作方接口
//! - `error_aggregator` - 错误统计与导出
//! - `logging` - 日志初始化
//! - `utils` - 时间戳与锁辅助函数

pub mod error;
pub mod error_aggregator;
pub mod logging;
pub mod reporting;
pub mod utils;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{
    BindingError, BindingResult, EngineError, EngineResult, ScriptError, ScriptResult,
};

// 重新导出报告器
pub use error_aggregator::{ErrorAggregator, ErrorRecord, ErrorStats, ReportSeverity};
pub use reporting::{ErrorReporter, TracingErrorReporter};

pub use logging::init_logging;
pub use utils::{current_timestamp, current_timestamp_f64};
