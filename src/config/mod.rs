/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod pool;
pub mod script;

pub use pool::EventPoolConfig;
pub use script::ScriptConfig;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 绑定层主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// 事件池配置
    #[serde(default)]
    pub event_pool: EventPoolConfig,

    /// 节点数组追加元素时的扩容步长
    #[serde(default = "default_array_growth")]
    pub array_growth: usize,

    /// 脚本控制器配置
    #[serde(default)]
    pub script: ScriptConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_array_growth() -> usize {
    8
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            event_pool: EventPoolConfig::default(),
            array_growth: default_array_growth(),
            script: ScriptConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BindingConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BINDING_EVENT_POOL_MAX") {
            if let Ok(max) = val.parse() {
                self.event_pool.max_size = max;
            }
        }
        if let Ok(val) = env::var("BINDING_ARRAY_GROWTH") {
            if let Ok(growth) = val.parse() {
                self.array_growth = growth;
            }
        }
        if let Ok(val) = env::var("BINDING_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.array_growth == 0 {
            return Err(ConfigError::ValidationError(
                "array_growth must be at least 1".to_string(),
            ));
        }
        self.event_pool.validate()?;
        self.script.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./scene_binding.toml
    /// 2. ./scene_binding.json
    /// 3. ~/.config/scene_binding/config.toml
    /// 4. 使用默认配置
    ///
    /// 无论来源如何，最后都会应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::discover().unwrap_or_else(|| {
            tracing::debug!(target: "binding", "Using default binding configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn discover() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("scene_binding.toml") {
            tracing::info!(target: "binding", "Loaded config from scene_binding.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("scene_binding.json") {
            tracing::info!(target: "binding", "Loaded config from scene_binding.json");
            return Some(config);
        }

        let home = env::var_os("HOME")?;
        let config_path = PathBuf::from(home)
            .join(".config")
            .join("scene_binding")
            .join("config.toml");
        match Self::from_toml_file(&config_path) {
            Ok(config) => {
                tracing::info!(target: "binding", "Loaded config from {:?}", config_path);
                Some(config)
            }
            Err(_) => None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

use crate::impl_default;

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// EnvFilter 指令字符串
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// 不区分大小写解析级别名
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BindingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.array_growth, 8);
        assert!(config.script.is_read_only("directOutput"));
        assert!(config.script.is_read_only("mustEvaluate"));
        assert!(!config.script.is_read_only("set_fraction"));
    }

    #[test]
    fn test_toml_serialization() {
        let config = BindingConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BindingConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BindingConfig::from_toml_str("array_growth = 16\n").unwrap();
        assert_eq!(config.array_growth, 16);
        assert_eq!(config.event_pool, EventPoolConfig::default());
        assert_eq!(config.script.direct_output_field, "directOutput");
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!(
            "scene_binding_cfg_{}",
            crate::core::utils::current_timestamp_f64().to_bits()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = BindingConfig::default();
        config.logging.level = LogLevel::Debug;
        config.save_json(&path).unwrap();

        let loaded = BindingConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.logging.level, LogLevel::Debug);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = BindingConfig::default();
        config.array_growth = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = BindingConfig::default();
        config.event_pool.initial_size = 64;
        config.event_pool.max_size = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" trace "), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::Error.as_filter(), "error");
    }
}
