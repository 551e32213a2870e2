//! 脚本控制器配置

use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 脚本控制器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// 决定直接输出模式的布尔字段名
    pub direct_output_field: String,

    /// 脚本自身字段中始终只读的字段名
    pub read_only_fields: Vec<String>,
}

impl_default!(ScriptConfig {
    direct_output_field: "directOutput".to_string(),
    read_only_fields: vec!["mustEvaluate".to_string(), "directOutput".to_string()],
});

impl ScriptConfig {
    /// 字段是否应被标记为只读
    pub fn is_read_only(&self, name: &str) -> bool {
        self.read_only_fields.iter().any(|f| f == name)
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.direct_output_field.is_empty() {
            return Err(ConfigError::ValidationError(
                "direct_output_field must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
