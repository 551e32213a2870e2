//! 包装器缓存
//!
//! 节点身份 → [`NodeWrapper`]，(节点身份, 字段索引, 视角) → [`FieldWrapper`]。
//! 缓存只持有弱引用；调用方丢弃最后一个强引用时，包装器的 `Drop` 把一条回收记录
//! 送入回收队列。队列只在确定的同步点排空（查找、`disable_fields`、显式 `release`），
//! 排空时先把未同步的脏值写回节点，再清理失效的缓存条目。

use super::event::EventPool;
use super::factory::NodeWrapperFactory;
use super::field::{FieldAccessListener, FieldInner, FieldWrapper};
use super::node::{NodeInner, NodeWrapper};
use crate::config::BindingConfig;
use crate::core::error::{BindingError, BindingResult, EngineError, ScriptError};
use crate::core::reporting::{ErrorReporter, TracingErrorReporter};
use crate::core::utils::lock;
use crate::engine::{FieldValue, NodeHandle, NodeKey, NodeListener};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// 字段缓存键
///
/// 同一节点字段的内部视角与外部视角是两个不同的包装器。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub node: NodeKey,
    pub index: usize,
    pub internal: bool,
}

/// 回收记录
pub(crate) enum Reclaimed {
    Field(ReclaimedField),
    Node(NodeKey),
}

/// 被回收字段的残留状态
pub(crate) struct ReclaimedField {
    pub(crate) key: FieldKey,
    pub(crate) node: NodeHandle,
    pub(crate) name: String,
    /// 未同步的脏值
    pub(crate) pending: Option<FieldValue>,
    /// 节点类型字段持有的子节点包装器
    pub(crate) children: Vec<NodeWrapper>,
    pub(crate) node_listener: Option<Arc<dyn NodeListener>>,
}

pub(crate) struct CacheShared {
    nodes: Mutex<HashMap<NodeKey, Weak<NodeInner>>>,
    fields: Mutex<HashMap<FieldKey, Weak<FieldInner>>>,
    reclaim_tx: Sender<Reclaimed>,
    reclaim_rx: Receiver<Reclaimed>,
    factory: NodeWrapperFactory,
    access_listener: Mutex<Option<Weak<dyn FieldAccessListener>>>,
    reporter: Arc<dyn ErrorReporter>,
    events: EventPool,
    array_growth: usize,
}

/// 包装器缓存（可廉价克隆的共享句柄）
#[derive(Clone)]
pub struct WrapperCache(Arc<CacheShared>);

impl Default for WrapperCache {
    fn default() -> Self {
        Self::new(
            &BindingConfig::default(),
            NodeWrapperFactory::default(),
            Arc::new(TracingErrorReporter),
        )
    }
}

impl WrapperCache {
    pub fn new(
        config: &BindingConfig,
        factory: NodeWrapperFactory,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let (reclaim_tx, reclaim_rx) = unbounded();
        Self(Arc::new(CacheShared {
            nodes: Mutex::new(HashMap::new()),
            fields: Mutex::new(HashMap::new()),
            reclaim_tx,
            reclaim_rx,
            factory,
            access_listener: Mutex::new(None),
            reporter,
            events: EventPool::from_config(&config.event_pool),
            array_growth: config.array_growth.max(1),
        }))
    }

    // ========================================================================
    // 共享资源
    // ========================================================================

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.0.reporter
    }

    pub(crate) fn events(&self) -> &EventPool {
        &self.0.events
    }

    pub fn array_growth(&self) -> usize {
        self.0.array_growth
    }

    pub fn factory(&self) -> &NodeWrapperFactory {
        &self.0.factory
    }

    /// 设置节点字段回调时请求扩大访问窗口的监听方
    pub fn set_access_listener(&self, listener: Weak<dyn FieldAccessListener>) {
        *lock(&self.0.access_listener) = Some(listener);
    }

    pub(crate) fn access_listener(&self) -> Option<Arc<dyn FieldAccessListener>> {
        lock(&self.0.access_listener).as_ref()?.upgrade()
    }

    pub(crate) fn reclaim_sender(&self) -> &Sender<Reclaimed> {
        &self.0.reclaim_tx
    }

    // ========================================================================
    // 节点包装器
    // ========================================================================

    /// 获取（或创建）节点包装器，查找前先排空回收队列
    pub fn node_wrapper(&self, node: &NodeHandle) -> NodeWrapper {
        self.drain_reclaimed();
        self.lookup_node_wrapper(node)
    }

    /// 获取（或创建）节点包装器，不排空回收队列
    ///
    /// 值同步过程中使用：此时调用方持有字段锁，不能在这里写回其他字段。
    pub(crate) fn lookup_node_wrapper(&self, node: &NodeHandle) -> NodeWrapper {
        let key = node.key();
        let mut nodes = lock(&self.0.nodes);
        if let Some(existing) = nodes.get(&key).and_then(Weak::upgrade) {
            return NodeWrapper::from_inner(existing);
        }

        let wrapper = NodeWrapper::create(self.clone(), node.clone());
        nodes.insert(key, wrapper.downgrade_inner());
        tracing::trace!(target: "binding::cache", node = node.node_name(), "Created node wrapper");
        wrapper
    }

    /// 从缓存中移除节点包装器（仅当条目仍指向该包装器）
    pub(crate) fn forget_node(&self, key: NodeKey, inner: &Weak<NodeInner>) {
        let mut nodes = lock(&self.0.nodes);
        if nodes.get(&key).map_or(false, |w| w.ptr_eq(inner)) {
            nodes.remove(&key);
        }
    }

    // ========================================================================
    // 字段包装器
    // ========================================================================

    /// 按名称获取（或创建）字段包装器
    ///
    /// 未声明的字段返回 `InvalidFieldViolation`。
    pub fn field_wrapper(
        &self,
        node: &NodeHandle,
        name: &str,
        internal: bool,
    ) -> BindingResult<FieldWrapper> {
        let index = node
            .field_index(name)
            .ok_or_else(|| BindingError::InvalidFieldViolation {
                node: node.node_name().to_string(),
                field: name.to_string(),
            })?;
        self.field_wrapper_at(node, index, internal)
    }

    /// 按索引获取（或创建）字段包装器
    pub fn field_wrapper_at(
        &self,
        node: &NodeHandle,
        index: usize,
        internal: bool,
    ) -> BindingResult<FieldWrapper> {
        self.drain_reclaimed();

        let decl = node
            .field_declaration(index)
            .ok_or(EngineError::InvalidIndex(index))?;
        let key = FieldKey {
            node: node.key(),
            index,
            internal,
        };

        let mut fields = lock(&self.0.fields);
        if let Some(existing) = fields.get(&key).and_then(Weak::upgrade) {
            return Ok(FieldWrapper::from_inner(existing));
        }

        let wrapper = FieldWrapper::create(self.clone(), node.clone(), index, decl, internal);
        fields.insert(key, wrapper.downgrade_inner());
        tracing::trace!(
            target: "binding::cache",
            node = node.node_name(),
            field = wrapper.name(),
            internal,
            "Created field wrapper"
        );
        Ok(wrapper)
    }

    /// 从缓存中移除字段包装器（仅当条目仍指向该包装器）
    pub(crate) fn forget_field(&self, key: FieldKey, inner: &Weak<FieldInner>) {
        let mut fields = lock(&self.0.fields);
        if fields.get(&key).map_or(false, |w| w.ptr_eq(inner)) {
            fields.remove(&key);
        }
    }

    /// 显式释放字段包装器
    ///
    /// 传入的是最后一个强引用时立即回收并写回脏值，返回 `true`。
    pub fn release(&self, field: FieldWrapper) -> bool {
        let last = field.strong_count() == 1;
        drop(field);
        self.drain_reclaimed();
        last
    }

    // ========================================================================
    // 回收
    // ========================================================================

    /// 排空回收队列：写回脏值，清理失效条目。返回处理的记录数。
    pub fn drain_reclaimed(&self) -> usize {
        let mut processed = 0;
        while let Ok(record) = self.0.reclaim_rx.try_recv() {
            processed += 1;
            match record {
                Reclaimed::Field(field) => self.finish_field(field),
                Reclaimed::Node(key) => {
                    let mut nodes = lock(&self.0.nodes);
                    if nodes.get(&key).map_or(false, |w| w.strong_count() == 0) {
                        nodes.remove(&key);
                    }
                }
            }
        }
        processed
    }

    fn finish_field(&self, field: ReclaimedField) {
        if let Some(listener) = &field.node_listener {
            field.node.remove_node_listener(listener);
        }

        for child in &field.children {
            if let Err(err) = child.update_node_and_children() {
                self.report_flush_failure(&field.name, &err);
            }
        }

        if let Some(value) = field.pending {
            tracing::debug!(
                target: "binding::cache",
                field = %field.name,
                "Flushing reclaimed field"
            );
            if let Err(err) = field.node.set_value(field.key.index, value) {
                self.report_flush_failure(&field.name, &BindingError::Engine(err));
            }
        }

        let mut fields = lock(&self.0.fields);
        if fields
            .get(&field.key)
            .map_or(false, |w| w.strong_count() == 0)
        {
            fields.remove(&field.key);
        }
    }

    fn report_flush_failure(&self, field: &str, err: &BindingError) {
        let message = format!("Unable to flush reclaimed field `{}`", field);
        let err = ScriptError::from(err.clone());
        self.0.reporter.warning_report(&message, Some(&err));
    }

    // ========================================================================
    // 统计
    // ========================================================================

    /// 仍存活的节点包装器数量
    pub fn live_node_count(&self) -> usize {
        lock(&self.0.nodes)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// 仍存活的字段包装器数量
    pub fn live_field_count(&self) -> usize {
        lock(&self.0.fields)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// 缓存条目总数（含尚未清理的失效条目）
    pub fn entry_count(&self) -> usize {
        lock(&self.0.nodes).len() + lock(&self.0.fields).len()
    }
}
