//! 脚本执行上下文
//!
//! 脚本通过上下文创建节点与原型实例、查找 DEF 名称、读写路由。
//! 经上下文取得的节点包装器会被记住，控制器开关访问窗口时一并开关它们，
//! 并在同步点写回它们的修改。

use super::cache::WrapperCache;
use super::node::{NodeWrapper, WeakNodeWrapper};
use super::route::Route;
use crate::core::error::{BindingError, BindingResult};
use crate::core::utils::lock;
use crate::engine::{AccessKind, EngineRoute, NodeHandle, RouteManager, SceneSpace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct ContextShared {
    scene: Arc<dyn SceneSpace>,
    route_manager: Arc<dyn RouteManager>,
    cache: WrapperCache,
    tracked: Mutex<Vec<WeakNodeWrapper>>,
    routes: Mutex<HashMap<EngineRoute, Route>>,
}

/// 脚本执行上下文（可克隆的共享句柄）
#[derive(Clone)]
pub struct ExecutionContext(Arc<ContextShared>);

impl ExecutionContext {
    pub fn new(
        scene: Arc<dyn SceneSpace>,
        route_manager: Arc<dyn RouteManager>,
        cache: WrapperCache,
    ) -> Self {
        Self(Arc::new(ContextShared {
            scene,
            route_manager,
            cache,
            tracked: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
        }))
    }

    pub fn cache(&self) -> &WrapperCache {
        &self.0.cache
    }

    /// 包装引擎节点，打开其访问并记住它
    fn expose(&self, node: &NodeHandle) -> NodeWrapper {
        let wrapper = self.0.cache.node_wrapper(node);
        wrapper.set_access_permitted(true);

        let mut tracked = lock(&self.0.tracked);
        tracked.retain(|w| w.upgrade().is_some());
        if !tracked
            .iter()
            .filter_map(WeakNodeWrapper::upgrade)
            .any(|w| w == wrapper)
        {
            tracked.push(wrapper.downgrade());
        }
        wrapper
    }

    fn tracked_nodes(&self) -> Vec<NodeWrapper> {
        let mut tracked = lock(&self.0.tracked);
        tracked.retain(|w| w.upgrade().is_some());
        tracked.iter().filter_map(WeakNodeWrapper::upgrade).collect()
    }

    // ========================================================================
    // 节点
    // ========================================================================

    /// 按类型名创建节点；未知类型返回 `InvalidNodeViolation`
    pub fn create_node(&self, type_name: &str) -> BindingResult<NodeWrapper> {
        let node = self.0.scene.create_node(type_name).ok_or_else(|| {
            BindingError::InvalidNodeViolation(format!("unknown node type `{}`", type_name))
        })?;
        tracing::debug!(target: "binding", type_name, "Created node");
        Ok(self.expose(&node))
    }

    pub fn proto_names(&self) -> Vec<String> {
        self.0.scene.proto_names()
    }

    pub fn create_proto_instance(&self, name: &str) -> BindingResult<NodeWrapper> {
        let node = self.0.scene.create_proto_instance(name).ok_or_else(|| {
            BindingError::InvalidNodeViolation(format!("unknown prototype `{}`", name))
        })?;
        tracing::debug!(target: "binding", proto = name, "Created proto instance");
        Ok(self.expose(&node))
    }

    /// DEF 名称查找
    pub fn named_node(&self, name: &str) -> Option<NodeWrapper> {
        self.0.scene.named_node(name).map(|node| self.expose(&node))
    }

    pub fn named_nodes(&self) -> Vec<(String, NodeWrapper)> {
        self.0
            .scene
            .named_nodes()
            .into_iter()
            .map(|(name, node)| (name, self.expose(&node)))
            .collect()
    }

    pub fn root_nodes(&self) -> Vec<NodeWrapper> {
        self.0
            .scene
            .root_nodes()
            .iter()
            .map(|node| self.expose(node))
            .collect()
    }

    // ========================================================================
    // 路由
    // ========================================================================

    /// 当前全部路由
    ///
    /// 同一条引擎路由在两次调用之间返回相等的值对象；已删除的路由不再保留。
    pub fn routes(&self) -> Vec<Route> {
        let engine_routes = self.0.scene.routes();
        let mut memo = lock(&self.0.routes);
        memo.retain(|key, _| engine_routes.contains(key));

        let mut routes = Vec::with_capacity(engine_routes.len());
        for engine_route in engine_routes {
            if let Some(route) = memo.get(&engine_route) {
                routes.push(route.clone());
                continue;
            }

            let names = engine_route
                .source
                .field_declaration(engine_route.source_field)
                .zip(
                    engine_route
                        .destination
                        .field_declaration(engine_route.destination_field),
                );
            let Some((source_decl, destination_decl)) = names else {
                tracing::warn!(
                    target: "binding",
                    source = engine_route.source.node_name(),
                    destination = engine_route.destination.node_name(),
                    "Skipping route with undeclared endpoint"
                );
                continue;
            };

            let route = Route::new(
                self.expose(&engine_route.source),
                source_decl.name(),
                self.expose(&engine_route.destination),
                destination_decl.name(),
            );
            memo.insert(engine_route, route.clone());
            routes.push(route);
        }
        routes
    }

    /// 建立路由
    ///
    /// 源字段必须能发出事件（output-only 或 input-output），目标字段必须能接收事件
    /// （input-only 或 input-output）。
    pub fn add_route(
        &self,
        source: &NodeWrapper,
        source_field: &str,
        destination: &NodeWrapper,
        destination_field: &str,
    ) -> BindingResult<Route> {
        let (src, src_index) = endpoint(
            source,
            source_field,
            AccessKind::can_route_from,
            BindingError::NotReadableViolation,
        )?;
        let (dst, dst_index) = endpoint(
            destination,
            destination_field,
            AccessKind::can_route_to,
            BindingError::NotWritableViolation,
        )?;

        self.0
            .route_manager
            .add_route(&src, src_index, &dst, dst_index)?;
        tracing::debug!(
            target: "binding",
            source = %format!("{}.{}", source.node_name(), source_field),
            destination = %format!("{}.{}", destination.node_name(), destination_field),
            "Route added"
        );
        Ok(Route::new(
            source.clone(),
            source_field,
            destination.clone(),
            destination_field,
        ))
    }

    pub fn remove_route(&self, route: &Route) -> BindingResult<()> {
        let (src, src_index) = endpoint(
            route.source(),
            route.source_field(),
            AccessKind::can_route_from,
            BindingError::NotReadableViolation,
        )?;
        let (dst, dst_index) = endpoint(
            route.destination(),
            route.destination_field(),
            AccessKind::can_route_to,
            BindingError::NotWritableViolation,
        )?;

        self.0
            .route_manager
            .remove_route(&src, src_index, &dst, dst_index)?;
        Ok(())
    }

    // ========================================================================
    // 访问窗口与同步
    // ========================================================================

    /// 开关经上下文取得的所有节点的访问
    pub fn set_access_permitted(&self, permitted: bool) {
        for node in self.tracked_nodes() {
            node.set_access_permitted(permitted);
        }
    }

    /// 写回经上下文取得的节点上的修改
    ///
    /// 某个节点写回失败不影响其余节点；返回遇到的第一个错误。
    pub fn update_event_outs(&self) -> BindingResult<()> {
        self.for_each_live(|node| node.update_node_and_children())
    }

    /// 从节点重新拉取经上下文取得的节点字段
    pub fn update_fields(&self) -> BindingResult<()> {
        self.for_each_live(|node| node.update_fields())
    }

    fn for_each_live(
        &self,
        mut f: impl FnMut(&NodeWrapper) -> BindingResult<()>,
    ) -> BindingResult<()> {
        let mut first = None;
        for node in self.tracked_nodes() {
            if node.is_disposed() {
                continue;
            }
            if let Err(err) = f(&node) {
                tracing::warn!(
                    target: "binding",
                    node = node.node_name(),
                    error = %err,
                    "Tracked node sync failed"
                );
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked_nodes().len()
    }
}

/// 解析路由端点并检查事件方向
fn endpoint(
    node: &NodeWrapper,
    field: &str,
    direction: fn(AccessKind) -> bool,
    violation: fn(String) -> BindingError,
) -> BindingResult<(NodeHandle, usize)> {
    let handle = node.handle()?;
    let index = handle
        .field_index(field)
        .ok_or_else(|| BindingError::InvalidFieldViolation {
            node: node.node_name().to_string(),
            field: field.to_string(),
        })?;
    let allowed = handle
        .field_declaration(index)
        .map_or(false, |decl| direction(decl.access()));
    if !allowed {
        return Err(violation(field.to_string()));
    }
    Ok((handle, index))
}
