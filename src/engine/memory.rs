//! 内存引擎
//!
//! 不带渲染器的参考实现，用于测试以及只需要运行脚本逻辑的嵌入方。

use super::field::{FieldDeclaration, FieldValue};
use super::node::{Node, NodeHandle, NodeListener, UserData};
use super::scene::{EngineRoute, RouteManager, SceneSpace};
use crate::core::error::{EngineError, EngineResult};
use crate::core::utils::lock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// 节点
// ============================================================================

/// 内存节点
///
/// 通过 [`Node::set_value`] 的写入不会回调监听器；引擎侧的变化用
/// [`MemoryNode::set_engine_value`] 加 [`MemoryNode::notify_changed`] 模拟。
pub struct MemoryNode {
    name: String,
    declarations: Vec<FieldDeclaration>,
    values: Mutex<Vec<FieldValue>>,
    user_data: Mutex<Vec<Option<UserData>>>,
    listeners: Mutex<Vec<Arc<dyn NodeListener>>>,
    rejected: Mutex<BTreeSet<usize>>,
    setup_finished: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>, declarations: Vec<FieldDeclaration>) -> Self {
        let values = declarations
            .iter()
            .map(|decl| FieldValue::default_for(decl.kind()))
            .collect();
        let user_data = vec![None; declarations.len()];
        Self {
            name: name.into(),
            declarations,
            values: Mutex::new(values),
            user_data: Mutex::new(user_data),
            listeners: Mutex::new(Vec::new()),
            rejected: Mutex::new(BTreeSet::new()),
            setup_finished: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn shared(name: impl Into<String>, declarations: Vec<FieldDeclaration>) -> Arc<Self> {
        Arc::new(Self::new(name, declarations))
    }

    /// 获取该节点的共享句柄
    pub fn handle(self: &Arc<Self>) -> NodeHandle {
        NodeHandle::from_arc(Arc::clone(self) as Arc<dyn Node>)
    }

    fn check_value(&self, index: usize, value: &FieldValue) -> EngineResult<()> {
        let decl = self
            .declarations
            .get(index)
            .ok_or(EngineError::InvalidIndex(index))?;
        if decl.kind() != value.kind() {
            return Err(EngineError::KindMismatch {
                index,
                expected: decl.kind(),
                found: value.kind(),
            });
        }
        Ok(())
    }

    /// 引擎侧直接修改字段值（例如路由传递），不计入写入次数也不发通知
    pub fn set_engine_value(&self, index: usize, value: FieldValue) -> EngineResult<()> {
        self.check_value(index, &value)?;
        lock(&self.values)[index] = value;
        Ok(())
    }

    /// 向所有监听器发送字段变更通知
    pub fn notify_changed(&self, index: usize) {
        let listeners: Vec<_> = lock(&self.listeners).clone();
        for listener in listeners {
            listener.field_changed(index);
        }
    }

    /// 按字段名读取当前值
    pub fn value_of(&self, name: &str) -> Option<FieldValue> {
        let index = self.field_index(name)?;
        lock(&self.values).get(index).cloned()
    }

    /// 让之后经 `Node::set_value` 对该字段的写入失败
    pub fn reject_writes(&self, index: usize) {
        lock(&self.rejected).insert(index);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// 通过 `Node::set_value` 完成的写入次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Node for MemoryNode {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn field_count(&self) -> usize {
        self.declarations.len()
    }

    fn field_declaration(&self, index: usize) -> Option<FieldDeclaration> {
        self.declarations.get(index).cloned()
    }

    fn field_value(&self, index: usize) -> EngineResult<FieldValue> {
        lock(&self.values)
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidIndex(index))
    }

    fn set_value(&self, index: usize, value: FieldValue) -> EngineResult<()> {
        self.check_value(index, &value)?;
        if lock(&self.rejected).contains(&index) {
            return Err(EngineError::General(format!(
                "{} rejected write to field {}",
                self.name, index
            )));
        }
        lock(&self.values)[index] = value;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_node_listener(&self, listener: Arc<dyn NodeListener>) {
        let mut listeners = lock(&self.listeners);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove_node_listener(&self, listener: &Arc<dyn NodeListener>) {
        lock(&self.listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn is_setup_finished(&self) -> bool {
        self.setup_finished.load(Ordering::SeqCst)
    }

    fn setup_finished(&self) {
        self.setup_finished.store(true, Ordering::SeqCst);
    }

    fn user_data(&self, index: usize) -> Option<UserData> {
        lock(&self.user_data).get(index).cloned().flatten()
    }

    fn set_user_data(&self, index: usize, data: Option<UserData>) {
        if let Some(slot) = lock(&self.user_data).get_mut(index) {
            *slot = data;
        }
    }
}

// ============================================================================
// 场景
// ============================================================================

/// 内存场景空间
#[derive(Default)]
pub struct MemoryScene {
    node_types: Mutex<HashMap<String, Vec<FieldDeclaration>>>,
    protos: Mutex<BTreeMap<String, Vec<FieldDeclaration>>>,
    named: Mutex<BTreeMap<String, NodeHandle>>,
    roots: Mutex<Vec<NodeHandle>>,
    routes: Arc<Mutex<Vec<EngineRoute>>>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册可通过 `create_node` 创建的节点类型
    pub fn register_node_type(&self, type_name: impl Into<String>, fields: Vec<FieldDeclaration>) {
        lock(&self.node_types).insert(type_name.into(), fields);
    }

    pub fn register_proto(&self, name: impl Into<String>, fields: Vec<FieldDeclaration>) {
        lock(&self.protos).insert(name.into(), fields);
    }

    /// 定义 DEF 名称
    pub fn define(&self, name: impl Into<String>, node: NodeHandle) {
        lock(&self.named).insert(name.into(), node);
    }

    pub fn add_root(&self, node: NodeHandle) {
        lock(&self.roots).push(node);
    }

    /// 与本场景共享路由表的路由管理器
    pub fn route_manager(&self) -> MemoryRouteManager {
        MemoryRouteManager {
            routes: Arc::clone(&self.routes),
        }
    }
}

impl SceneSpace for MemoryScene {
    fn create_node(&self, type_name: &str) -> Option<NodeHandle> {
        let fields = lock(&self.node_types).get(type_name).cloned()?;
        Some(MemoryNode::shared(type_name, fields).handle())
    }

    fn proto_names(&self) -> Vec<String> {
        lock(&self.protos).keys().cloned().collect()
    }

    fn create_proto_instance(&self, name: &str) -> Option<NodeHandle> {
        let fields = lock(&self.protos).get(name).cloned()?;
        Some(MemoryNode::shared(name, fields).handle())
    }

    fn named_node(&self, name: &str) -> Option<NodeHandle> {
        lock(&self.named).get(name).cloned()
    }

    fn named_nodes(&self) -> Vec<(String, NodeHandle)> {
        lock(&self.named)
            .iter()
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect()
    }

    fn root_nodes(&self) -> Vec<NodeHandle> {
        lock(&self.roots).clone()
    }

    fn routes(&self) -> Vec<EngineRoute> {
        lock(&self.routes).clone()
    }
}

// ============================================================================
// 路由
// ============================================================================

/// 内存路由管理器
#[derive(Default, Clone)]
pub struct MemoryRouteManager {
    routes: Arc<Mutex<Vec<EngineRoute>>>,
}

impl MemoryRouteManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_count(&self) -> usize {
        lock(&self.routes).len()
    }
}

fn endpoint_check(node: &NodeHandle, index: usize) -> EngineResult<()> {
    if node.field_declaration(index).is_none() {
        return Err(EngineError::InvalidIndex(index));
    }
    Ok(())
}

impl RouteManager for MemoryRouteManager {
    fn add_route(
        &self,
        source: &NodeHandle,
        source_field: usize,
        destination: &NodeHandle,
        destination_field: usize,
    ) -> EngineResult<()> {
        endpoint_check(source, source_field)?;
        endpoint_check(destination, destination_field)?;

        let route = EngineRoute {
            source: source.clone(),
            source_field,
            destination: destination.clone(),
            destination_field,
        };
        let mut routes = lock(&self.routes);
        if !routes.contains(&route) {
            routes.push(route);
        }
        Ok(())
    }

    fn remove_route(
        &self,
        source: &NodeHandle,
        source_field: usize,
        destination: &NodeHandle,
        destination_field: usize,
    ) -> EngineResult<()> {
        let mut routes = lock(&self.routes);
        let before = routes.len();
        routes.retain(|r| {
            !(r.source == *source
                && r.source_field == source_field
                && r.destination == *destination
                && r.destination_field == destination_field)
        });
        if routes.len() == before {
            return Err(EngineError::Route(format!(
                "no route from {}.{} to {}.{}",
                source.node_name(),
                source_field,
                destination.node_name(),
                destination_field
            )));
        }
        Ok(())
    }
}
