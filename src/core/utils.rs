//! 核心工具函数
//!
//! 时间戳与锁辅助函数，避免各模块重复实现

use std::sync::{Mutex, MutexGuard, PoisonError};

/// 获取当前Unix时间戳（秒）
///
/// 用于错误记录的时间标记。
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 获取当前Unix时间戳（秒，浮点数）
///
/// 节点主动发出的字段变更通知使用该时间戳填充事件。
///
/// # 示例
///
/// ```rust
/// use scene_binding::core::utils::current_timestamp_f64;
///
/// let stamp = current_timestamp_f64();
/// assert!(stamp > 0.0);
/// ```
pub fn current_timestamp_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// 获取互斥锁，忽略中毒状态
///
/// 监听器或回调中的 panic 不应让包装器永久不可用。
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
