//! 节点包装器工厂
//!
//! 静态注册表：节点类型标签 → 特化构造函数。找不到特化或构造失败时使用通用包装器，
//! 失败只记录日志，不会作为错误返回。

use crate::engine::NodeHandle;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// 特化构造错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecializationError {
    #[error("Node `{0}` is missing a field required by its specialization")]
    MissingField(String),
    #[error("Specialization failed: {0}")]
    Failed(String),
}

/// 某个节点类型的特化数据
///
/// 通过 [`NodeWrapper::specialization`](super::NodeWrapper::specialization) 向下转型取回。
pub trait NodeSpecialization: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn type_tag(&self) -> &str;
}

/// 特化构造函数
pub type SpecializationFn =
    fn(&NodeHandle) -> Result<Box<dyn NodeSpecialization>, SpecializationError>;

/// 包装器工厂注册表
#[derive(Default, Clone)]
pub struct NodeWrapperFactory {
    factories: HashMap<String, SpecializationFn>,
}

impl NodeWrapperFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册特化构造函数，返回被替换的旧函数
    pub fn register(
        &mut self,
        type_tag: impl Into<String>,
        factory: SpecializationFn,
    ) -> Option<SpecializationFn> {
        self.factories.insert(type_tag.into(), factory)
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// 为节点构造特化；`None` 表示使用通用包装器
    pub fn specialize(&self, node: &NodeHandle) -> Option<Box<dyn NodeSpecialization>> {
        let type_tag = node.node_name();
        let factory = self.factories.get(type_tag)?;

        match catch_unwind(AssertUnwindSafe(|| factory(node))) {
            Ok(Ok(specialization)) => Some(specialization),
            Ok(Err(err)) => {
                tracing::warn!(
                    target: "binding",
                    type_tag,
                    error = %err,
                    "Falling back to generic node wrapper"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    target: "binding",
                    type_tag,
                    "Specialization factory panicked, falling back to generic node wrapper"
                );
                None
            }
        }
    }
}
