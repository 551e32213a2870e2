//! 统一错误处理模块
//!
//! 提供绑定层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **引擎协作方错误** (`EngineError`): 由外部场景图引擎在读写字段、建立路由时报告
//! - **绑定层错误** (`BindingError`): 字段/节点包装器上的访问时序、方向、生命周期违规
//! - **脚本错误** (`ScriptError`): 用户回调（监听器、生命周期回调）返回的失败
//!
//! 所有绑定层错误都是同步、本地的：在调用点直接以 `Result` 返回，从不延迟。
//! 监听器与回调的失败则在多播器/控制器边界被捕获并通过 [`ErrorReporter`](super::ErrorReporter) 报告。

use crate::engine::ValueKind;
use thiserror::Error;

/// 外部引擎协作方报告的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Field index {0} is not declared on this node")]
    InvalidIndex(usize),

    #[error("Field {index} expects {expected} values, got {found}")]
    KindMismatch {
        index: usize,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Route error: {0}")]
    Route(String),

    #[error("General engine error: {0}")]
    General(String),
}

/// 绑定层错误
///
/// 每个字段操作最多只会产生时序错误与方向错误两类；其余变体来自节点生命周期、
/// 名称解析和值类型检查。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// 在任何允许访问的脚本回调窗口之外操作字段或节点
    #[error("Field or node `{0}` accessed outside of a permitted script callback window")]
    TimingViolation(String),

    /// 脚本试图写入自己被标记为只读的字段
    #[error("Field `{0}` is read-only for this script")]
    ReadOnlyViolation(String),

    #[error("Field `{0}` is not readable in the current state")]
    NotReadableViolation(String),

    #[error("Field `{0}` is not writable in the current state")]
    NotWritableViolation(String),

    /// 节点包装器已被释放，不再持有有效的节点句柄
    #[error("The wrapper has been disposed; no valid node handle exists")]
    DisposedViolation,

    #[error("Node `{node}` does not have a field named `{field}`")]
    InvalidFieldViolation { node: String, field: String },

    #[error("Invalid node: {0}")]
    InvalidNodeViolation(String),

    #[error("Field `{field}` holds {found} values, not {expected}")]
    ValueKindMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Index {index} is out of bounds for a field of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// 控制器已关闭，所有后续操作都会失败
    #[error("The script controller has been shut down")]
    ControllerShutDown,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// 脚本回调错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Script runtime error: {0}")]
    Runtime(String),

    #[error("Script binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Script callback panicked: {0}")]
    Panicked(String),
}

impl ScriptError {
    /// 创建运行时错误
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// 错误类型名称（用于错误统计）
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScriptError::Runtime(_) => "Runtime",
            ScriptError::Binding(_) => "Binding",
            ScriptError::Panicked(_) => "Panicked",
        }
    }

    /// 从 `catch_unwind` 捕获的 panic 负载构造错误
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// 结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;
pub type BindingResult<T> = Result<T, BindingError>;
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let engine_err = EngineError::InvalidIndex(7);
        let binding_err: BindingError = engine_err.into();
        assert!(matches!(binding_err, BindingError::Engine(EngineError::InvalidIndex(7))));

        let script_err: ScriptError = BindingError::DisposedViolation.into();
        assert_eq!(script_err.kind_name(), "Binding");
    }

    #[test]
    fn test_error_display() {
        let err = BindingError::InvalidFieldViolation {
            node: "Transform".to_string(),
            field: "colour".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Node `Transform` does not have a field named `colour`"
        );
    }

    #[test]
    fn test_panic_payload_message() {
        let err = ScriptError::from_panic(Box::new("boom"));
        assert_eq!(err, ScriptError::Panicked("boom".to_string()));

        let err = ScriptError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err, ScriptError::Panicked("owned boom".to_string()));
    }
}
