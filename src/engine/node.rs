//! 节点协作方接口
//!
//! 绑定层从不拥有节点，只持有 [`NodeHandle`] 共享句柄。

use super::field::{FieldDeclaration, FieldValue};
use crate::core::error::EngineResult;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// 附加在字段上的不透明用户数据
pub type UserData = Arc<dyn Any + Send + Sync>;

/// 节点字段变更通知的接收方
pub trait NodeListener: Send + Sync {
    fn field_changed(&self, index: usize);
}

/// 场景图节点
///
/// 节点可能被并发运行时访问，实现方需要自行保证内部可变性是线程安全的。
pub trait Node: Send + Sync {
    /// 节点类型名（同时作为包装器工厂的类型标签）
    fn node_name(&self) -> &str;

    /// 声明的字段数量
    fn field_count(&self) -> usize;

    fn field_declaration(&self, index: usize) -> Option<FieldDeclaration>;

    /// 按名称查找字段索引
    fn field_index(&self, name: &str) -> Option<usize> {
        (0..self.field_count()).find(|&index| {
            self.field_declaration(index)
                .map_or(false, |decl| decl.name() == name)
        })
    }

    fn field_value(&self, index: usize) -> EngineResult<FieldValue>;

    fn set_value(&self, index: usize, value: FieldValue) -> EngineResult<()>;

    fn add_node_listener(&self, listener: Arc<dyn NodeListener>);

    /// 按 `Arc` 指针身份移除监听器
    fn remove_node_listener(&self, listener: &Arc<dyn NodeListener>);

    /// 节点是否已完成初始化（此后外部不能再写 initialize-only 字段）
    fn is_setup_finished(&self) -> bool;

    fn setup_finished(&self);

    fn user_data(&self, index: usize) -> Option<UserData>;

    fn set_user_data(&self, index: usize, data: Option<UserData>);
}

/// 节点身份键
///
/// 由节点分配地址得出；只要有句柄存活，身份就不会被复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn raw(self) -> usize {
        self.0
    }
}

/// 节点共享句柄，按身份比较
#[derive(Clone)]
pub struct NodeHandle(Arc<dyn Node>);

impl NodeHandle {
    pub fn new<N: Node + 'static>(node: N) -> Self {
        Self(Arc::new(node))
    }

    pub fn from_arc(node: Arc<dyn Node>) -> Self {
        Self(node)
    }

    pub fn key(&self) -> NodeKey {
        NodeKey(Arc::as_ptr(&self.0) as *const () as usize)
    }

    /// 两个句柄是否指向同一节点
    pub fn same_node(&self, other: &NodeHandle) -> bool {
        self.key() == other.key()
    }
}

impl Deref for NodeHandle {
    type Target = dyn Node;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.node_name())
            .field("key", &self.key().raw())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::{AccessKind, ValueKind};
    use crate::engine::memory::MemoryNode;

    fn sample() -> Arc<MemoryNode> {
        MemoryNode::shared(
            "Transform",
            vec![
                FieldDeclaration::new("translation", AccessKind::InputOutput, ValueKind::ScalarArray),
                FieldDeclaration::new("children", AccessKind::InputOutput, ValueKind::NodeArray),
            ],
        )
    }

    #[test]
    fn test_handle_identity() {
        let node = sample();
        let a = node.handle();
        let b = node.handle();
        let other = sample().handle();

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, other);
    }

    #[test]
    fn test_default_field_index_scan() {
        let handle = sample().handle();
        assert_eq!(handle.field_index("children"), Some(1));
        assert_eq!(handle.field_index("scale"), None);
    }
}
