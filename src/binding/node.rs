//! 节点包装器
//!
//! 脚本侧的节点代理。包装器持有节点句柄直到被释放；释放后所有访问都返回
//! `DisposedViolation`。节点类型注册了特化时，包装器还携带特化数据。
//!
//! 包装器只以弱引用记住通过 [`NodeWrapper::get_field`] 取到的字段包装器，
//! 访问标志和同步操作会沿这些字段向下传播。持有节点锁时从不获取字段锁。

use super::cache::{Reclaimed, WrapperCache};
use super::factory::NodeSpecialization;
use super::field::{FieldInner, FieldWrapper};
use crate::core::error::{BindingError, BindingResult};
use crate::core::utils::lock;
use crate::engine::{FieldDeclaration, NodeHandle, NodeKey};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

struct NodeState {
    node: Option<NodeHandle>,
    access_permitted: bool,
    fields: BTreeMap<usize, Weak<FieldInner>>,
    definitions: Option<Arc<[FieldDeclaration]>>,
}

pub(crate) struct NodeInner {
    key: NodeKey,
    name: String,
    cache: WrapperCache,
    specialization: Option<Box<dyn NodeSpecialization>>,
    state: Mutex<NodeState>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        let _ = self.cache.reclaim_sender().send(Reclaimed::Node(self.key));
    }
}

/// 节点包装器（可克隆的共享句柄）
#[derive(Clone)]
pub struct NodeWrapper(Arc<NodeInner>);

/// 不阻止回收的节点包装器引用
#[derive(Clone, Default)]
pub struct WeakNodeWrapper(Weak<NodeInner>);

impl WeakNodeWrapper {
    pub fn upgrade(&self) -> Option<NodeWrapper> {
        self.0.upgrade().map(NodeWrapper)
    }
}

impl NodeWrapper {
    pub(crate) fn create(cache: WrapperCache, node: NodeHandle) -> Self {
        let specialization = cache.factory().specialize(&node);
        Self(Arc::new(NodeInner {
            key: node.key(),
            name: node.node_name().to_string(),
            cache,
            specialization,
            state: Mutex::new(NodeState {
                node: Some(node),
                access_permitted: false,
                fields: BTreeMap::new(),
                definitions: None,
            }),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<NodeInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade_inner(&self) -> Weak<NodeInner> {
        Arc::downgrade(&self.0)
    }

    pub fn downgrade(&self) -> WeakNodeWrapper {
        WeakNodeWrapper(self.downgrade_inner())
    }

    pub fn key(&self) -> NodeKey {
        self.0.key
    }

    /// 节点类型名；释放后仍然可用
    pub fn node_name(&self) -> &str {
        &self.0.name
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.0.state).node.is_none()
    }

    /// 底层节点句柄
    pub(crate) fn handle(&self) -> BindingResult<NodeHandle> {
        lock(&self.0.state)
            .node
            .clone()
            .ok_or(BindingError::DisposedViolation)
    }

    /// 取出节点句柄，要求未释放且处于访问窗口
    fn checked_handle(&self) -> BindingResult<NodeHandle> {
        let state = lock(&self.0.state);
        let node = state.node.clone().ok_or(BindingError::DisposedViolation)?;
        if !state.access_permitted {
            return Err(BindingError::TimingViolation(self.0.name.clone()));
        }
        Ok(node)
    }

    /// 取回注册的特化数据
    pub fn specialization<T: 'static>(&self) -> Option<&T> {
        self.0.specialization.as_ref()?.as_any().downcast_ref::<T>()
    }

    pub fn is_specialized(&self) -> bool {
        self.0.specialization.is_some()
    }

    // ========================================================================
    // 字段
    // ========================================================================

    /// 节点声明的全部字段
    pub fn field_definitions(&self) -> BindingResult<Arc<[FieldDeclaration]>> {
        let mut state = lock(&self.0.state);
        let node = state.node.clone().ok_or(BindingError::DisposedViolation)?;
        let definitions = state.definitions.get_or_insert_with(|| {
            (0..node.field_count())
                .filter_map(|i| node.field_declaration(i))
                .collect()
        });
        Ok(Arc::clone(definitions))
    }

    /// 按名称获取外部视角的字段包装器
    ///
    /// 本地值未修改时先从节点刷新。返回的字段继承节点的访问标志。
    pub fn get_field(&self, name: &str) -> BindingResult<FieldWrapper> {
        let node = self.handle()?;
        let field = self.0.cache.field_wrapper(&node, name, false)?;

        let permitted = {
            let mut state = lock(&self.0.state);
            if state.node.is_none() {
                return Err(BindingError::DisposedViolation);
            }
            state
                .fields
                .insert(field.index(), field.downgrade_inner());
            state.access_permitted
        };

        field.refresh()?;
        field.set_access_permitted(permitted);
        Ok(field)
    }

    /// 通过本包装器取到且仍然存活的字段
    pub fn accessed_fields(&self) -> Vec<FieldWrapper> {
        let mut state = lock(&self.0.state);
        state.fields.retain(|_, w| w.strong_count() > 0);
        state
            .fields
            .values()
            .filter_map(Weak::upgrade)
            .map(FieldWrapper::from_inner)
            .collect()
    }

    // ========================================================================
    // 访问标志
    // ========================================================================

    pub fn access_permitted(&self) -> bool {
        lock(&self.0.state).access_permitted
    }

    /// 设置访问标志并传播给已访问的字段；标志未变化时直接返回
    pub fn set_access_permitted(&self, permitted: bool) {
        {
            let mut state = lock(&self.0.state);
            if state.access_permitted == permitted {
                return;
            }
            state.access_permitted = permitted;
        }

        for field in self.accessed_fields() {
            field.set_access_permitted(permitted);
        }
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 节点是否已完成初始化
    pub fn is_realized(&self) -> bool {
        self.handle().map_or(false, |node| node.is_setup_finished())
    }

    /// 写回所有修改并完成节点初始化
    ///
    /// 已经完成初始化的节点直接返回。
    pub fn realize(&self) -> BindingResult<()> {
        let node = self.checked_handle()?;
        self.finish_setup(&node)
    }

    /// 节点被挂入某个字段时调用；访问已由该字段检查过
    pub(crate) fn realize_attached(&self) -> BindingResult<()> {
        let node = self.handle()?;
        self.finish_setup(&node)
    }

    fn finish_setup(&self, node: &NodeHandle) -> BindingResult<()> {
        if node.is_setup_finished() {
            return Ok(());
        }
        self.0.cache.drain_reclaimed();
        self.update_node_and_children()?;
        node.setup_finished();
        tracing::debug!(target: "binding", node = self.node_name(), "Node realized");
        Ok(())
    }

    /// 写回修改后释放包装器
    ///
    /// 已访问的字段随之失效，之后任何访问都会返回 `DisposedViolation`。
    pub fn dispose(&self) -> BindingResult<()> {
        self.checked_handle()?;
        self.0.cache.drain_reclaimed();
        self.update_node_and_children()?;

        let fields: Vec<FieldWrapper> = {
            let mut state = lock(&self.0.state);
            state.node = None;
            state.access_permitted = false;
            state.definitions = None;
            std::mem::take(&mut state.fields)
                .into_values()
                .filter_map(|w| w.upgrade())
                .map(FieldWrapper::from_inner)
                .collect()
        };

        for field in &fields {
            field.mark_disposed();
        }
        self.0.cache.forget_node(self.0.key, &self.downgrade_inner());
        tracing::debug!(target: "binding", node = self.node_name(), "Node wrapper disposed");
        Ok(())
    }

    // ========================================================================
    // 同步
    // ========================================================================

    /// 递归写回本节点及其子节点的修改
    pub fn update_node_and_children(&self) -> BindingResult<()> {
        self.push_tree(&mut HashSet::new())
    }

    /// 递归从节点拉取本节点及其子节点的字段值
    pub fn update_fields(&self) -> BindingResult<()> {
        self.pull_tree(&mut HashSet::new())
    }

    pub(crate) fn push_tree(&self, visited: &mut HashSet<NodeKey>) -> BindingResult<()> {
        if !visited.insert(self.0.key) || self.is_disposed() {
            return Ok(());
        }
        for field in self.accessed_fields() {
            field.push_tree(visited)?;
        }
        Ok(())
    }

    pub(crate) fn pull_tree(&self, visited: &mut HashSet<NodeKey>) -> BindingResult<()> {
        if !visited.insert(self.0.key) || self.is_disposed() {
            return Ok(());
        }
        for field in self.accessed_fields() {
            field.pull_tree(visited)?;
        }
        Ok(())
    }
}

impl PartialEq for NodeWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.0.key == other.0.key
    }
}

impl Eq for NodeWrapper {}

impl fmt::Debug for NodeWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeWrapper")
            .field("node", &self.0.name)
            .field("key", &self.0.key)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::factory::{NodeWrapperFactory, SpecializationError};
    use crate::config::BindingConfig;
    use crate::core::TracingErrorReporter;
    use crate::engine::{AccessKind, FieldValue, MemoryNode, ValueKind};
    use std::any::Any;

    fn transform() -> Arc<MemoryNode> {
        MemoryNode::shared(
            "Transform",
            vec![
                FieldDeclaration::new("translation", AccessKind::InputOutput, ValueKind::ScalarArray),
                FieldDeclaration::new("children", AccessKind::InputOutput, ValueKind::NodeArray),
                FieldDeclaration::new("bboxSize", AccessKind::InitializeOnly, ValueKind::ScalarArray),
            ],
        )
    }

    fn shape() -> Arc<MemoryNode> {
        MemoryNode::shared(
            "Shape",
            vec![FieldDeclaration::new("visible", AccessKind::InputOutput, ValueKind::Boolean)],
        )
    }

    #[test]
    fn test_get_field_is_cached_and_inherits_access() {
        let memory = transform();
        let cache = WrapperCache::default();
        let node = cache.node_wrapper(&memory.handle());

        let first = node.get_field("translation").unwrap();
        assert!(!first.access_permitted());

        node.set_access_permitted(true);
        let second = node.get_field("translation").unwrap();
        assert!(first.same_wrapper(&second));
        assert!(first.access_permitted());

        node.set_access_permitted(false);
        assert!(!second.access_permitted());

        assert!(matches!(
            node.get_field("colour"),
            Err(BindingError::InvalidFieldViolation { .. })
        ));
    }

    #[test]
    fn test_get_field_keeps_unflushed_writes() {
        let memory = transform();
        let cache = WrapperCache::default();
        let node = cache.node_wrapper(&memory.handle());
        node.set_access_permitted(true);

        let translation = node.get_field("translation").unwrap();
        translation.set_scalars(&[1.0, 2.0, 3.0]).unwrap();

        memory
            .set_engine_value(0, FieldValue::ScalarArray(vec![9.0]))
            .unwrap();
        let again = node.get_field("translation").unwrap();
        assert_eq!(again.get_scalars().unwrap(), vec![1.0, 2.0, 3.0]);

        node.update_node_and_children().unwrap();
        assert_eq!(
            memory.value_of("translation"),
            Some(FieldValue::ScalarArray(vec![1.0, 2.0, 3.0]))
        );
    }

    #[test]
    fn test_realize_flushes_initialize_only_then_locks() {
        let memory = transform();
        let cache = WrapperCache::default();
        let node = cache.node_wrapper(&memory.handle());

        assert_eq!(node.realize(), Err(BindingError::TimingViolation("Transform".to_string())));

        node.set_access_permitted(true);
        let bbox = node.get_field("bboxSize").unwrap();
        bbox.set_scalars(&[2.0, 2.0, 2.0]).unwrap();

        node.realize().unwrap();
        assert!(node.is_realized());
        assert_eq!(
            memory.value_of("bboxSize"),
            Some(FieldValue::ScalarArray(vec![2.0, 2.0, 2.0]))
        );
        assert!(matches!(
            bbox.set_scalars(&[1.0]),
            Err(BindingError::NotWritableViolation(_))
        ));
        // 再次调用不做任何事
        node.realize().unwrap();
    }

    #[test]
    fn test_attached_child_is_realized_and_enabled() {
        let parent_memory = transform();
        let child_memory = shape();
        let cache = WrapperCache::default();
        let parent = cache.node_wrapper(&parent_memory.handle());
        let child = cache.node_wrapper(&child_memory.handle());

        parent.set_access_permitted(true);
        let children = parent.get_field("children").unwrap();
        children.append_node(&child).unwrap();

        assert!(child.is_realized());
        assert!(child.access_permitted());

        parent.set_access_permitted(false);
        assert!(!child.access_permitted());

        parent.update_node_and_children().unwrap();
        assert_eq!(
            parent_memory.value_of("children"),
            Some(FieldValue::NodeArray(vec![Some(child_memory.handle())]))
        );
    }

    #[test]
    fn test_dispose_flushes_then_blocks_access() {
        let memory = shape();
        let cache = WrapperCache::default();
        let node = cache.node_wrapper(&memory.handle());
        node.set_access_permitted(true);

        let visible = node.get_field("visible").unwrap();
        visible.set_bool(true).unwrap();
        node.dispose().unwrap();

        assert_eq!(memory.value_of("visible"), Some(FieldValue::Boolean(true)));
        assert!(node.is_disposed());
        assert_eq!(node.node_name(), "Shape");
        assert_eq!(visible.get_bool(), Err(BindingError::DisposedViolation));
        assert_eq!(node.get_field("visible").unwrap_err(), BindingError::DisposedViolation);
        assert_eq!(node.dispose(), Err(BindingError::DisposedViolation));
        assert!(node.field_definitions().is_err());

        let replacement = cache.node_wrapper(&memory.handle());
        assert!(!replacement.is_disposed());
    }

    #[test]
    fn test_nested_update_fields() {
        let parent_memory = transform();
        let child_memory = shape();
        let cache = WrapperCache::default();
        let parent = cache.node_wrapper(&parent_memory.handle());

        parent_memory
            .set_engine_value(1, FieldValue::NodeArray(vec![Some(child_memory.handle())]))
            .unwrap();
        parent.set_access_permitted(true);
        let children = parent.get_field("children").unwrap();
        let child = children.node_at(0).unwrap().unwrap();
        assert!(child.access_permitted());

        let visible = child.get_field("visible").unwrap();
        child_memory.set_engine_value(0, FieldValue::Boolean(true)).unwrap();
        parent.update_fields().unwrap();
        assert!(visible.get_bool().unwrap());
    }

    #[test]
    fn test_field_definitions() {
        let memory = transform();
        let cache = WrapperCache::default();
        let node = cache.node_wrapper(&memory.handle());
        let names: Vec<_> = node
            .field_definitions()
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["translation", "children", "bboxSize"]);
    }

    struct ShapeInfo;

    impl NodeSpecialization for ShapeInfo {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn type_tag(&self) -> &str {
            "Shape"
        }
    }

    fn shape_specialization(
        _node: &NodeHandle,
    ) -> Result<Box<dyn NodeSpecialization>, SpecializationError> {
        Ok(Box::new(ShapeInfo))
    }

    #[test]
    fn test_specialized_wrapper() {
        let mut factory = NodeWrapperFactory::new();
        factory.register("Shape", shape_specialization);
        let cache = WrapperCache::new(
            &BindingConfig::default(),
            factory,
            Arc::new(TracingErrorReporter),
        );

        let shape = cache.node_wrapper(&shape().handle());
        assert!(shape.is_specialized());
        assert!(shape.specialization::<ShapeInfo>().is_some());

        let group = cache.node_wrapper(&transform().handle());
        assert!(!group.is_specialized());
    }

    #[test]
    fn test_weak_wrapper() {
        let memory = shape();
        let cache = WrapperCache::default();
        let node = cache.node_wrapper(&memory.handle());
        let weak = node.downgrade();
        assert_eq!(weak.upgrade(), Some(node.clone()));
        drop(node);
        assert!(weak.upgrade().is_none());
    }
}
