//! 场景空间与路由管理协作方

use super::node::NodeHandle;
use crate::core::error::EngineResult;

/// 引擎中的一条路由
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineRoute {
    pub source: NodeHandle,
    pub source_field: usize,
    pub destination: NodeHandle,
    pub destination_field: usize,
}

/// 脚本所在的场景空间
pub trait SceneSpace: Send + Sync {
    /// 按类型名创建节点；未知类型返回 `None`
    fn create_node(&self, type_name: &str) -> Option<NodeHandle>;

    /// 当前可用的原型名称
    fn proto_names(&self) -> Vec<String>;

    fn create_proto_instance(&self, name: &str) -> Option<NodeHandle>;

    /// DEF 名称查找
    fn named_node(&self, name: &str) -> Option<NodeHandle>;

    fn named_nodes(&self) -> Vec<(String, NodeHandle)>;

    fn root_nodes(&self) -> Vec<NodeHandle>;

    fn routes(&self) -> Vec<EngineRoute>;
}

/// 路由管理器
pub trait RouteManager: Send + Sync {
    fn add_route(
        &self,
        source: &NodeHandle,
        source_field: usize,
        destination: &NodeHandle,
        destination_field: usize,
    ) -> EngineResult<()>;

    fn remove_route(
        &self,
        source: &NodeHandle,
        source_field: usize,
        destination: &NodeHandle,
        destination_field: usize,
    ) -> EngineResult<()>;
}
