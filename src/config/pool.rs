use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 事件对象池配置
///
/// 事件池只是分配优化；`max_size` 为 0 时每次分发都重新分配。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPoolConfig {
    /// 预分配数量
    pub initial_size: usize,

    /// 池中最多保留的空闲事件数
    pub max_size: usize,
}

impl_default!(EventPoolConfig {
    initial_size: 4,
    max_size: 32,
});

impl EventPoolConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.initial_size > self.max_size {
            return Err(ConfigError::ValidationError(
                "event pool initial_size exceeds max_size".to_string(),
            ));
        }
        Ok(())
    }
}
