//! 字段包装器
//!
//! 一个 [`FieldWrapper`] 对应一个 (节点, 字段索引, 视角)。读写先经过访问门控，
//! 再操作本地缓冲区；本地写入只置脏标志，真正写回节点发生在 `update_node`
//! 或控制器的同步点。
//!
//! 锁顺序：持有字段锁时可以获取节点包装器锁与缓存表锁，反之不行。
//! 调用监听器、写回引擎、向子节点传播访问标志时都不持有字段锁。

use super::access::{check_access, is_readable, is_writable, AccessCheck};
use super::cache::{FieldKey, Reclaimed, ReclaimedField, WrapperCache};
use super::multicaster::{EventMulticaster, FieldEventListener};
use super::node::NodeWrapper;
use super::value::{FieldBuffer, NodeSlot, ScriptValue};
use crate::core::error::{BindingError, BindingResult, ScriptError};
use crate::core::utils::{current_timestamp_f64, lock};
use crate::engine::{
    AccessKind, FieldDeclaration, NodeHandle, NodeKey, NodeListener, PixelBuffer, UserData,
    ValueKind,
};
use glam::{DVec2, DVec3, DVec4};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// 访问窗口监听方
///
/// 节点主动通知字段变化时，字段请求监听方（通常是脚本控制器）在回调期间
/// 打开整个脚本的访问窗口。
pub trait FieldAccessListener: Send + Sync {
    fn child_requires_access_state_change(&self, enable: bool);
}

struct FieldState {
    buffer: FieldBuffer,
    dirty: bool,
    access_permitted: bool,
    read_only: bool,
    disposed: bool,
    listeners: EventMulticaster,
    node_listener: Option<Arc<dyn NodeListener>>,
}

pub(crate) struct FieldInner {
    node: NodeHandle,
    index: usize,
    decl: FieldDeclaration,
    internal: bool,
    cache: WrapperCache,
    state: Mutex<FieldState>,
}

impl Drop for FieldInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let live = !state.disposed;
        let record = ReclaimedField {
            key: FieldKey {
                node: self.node.key(),
                index: self.index,
                internal: self.internal,
            },
            node: self.node.clone(),
            name: self.decl.name().to_string(),
            pending: (live && state.dirty).then(|| state.buffer.to_value()),
            children: if live {
                state.buffer.node_wrappers()
            } else {
                Vec::new()
            },
            node_listener: state.node_listener.take(),
        };
        // 缓存与接收端随 `self.cache` 一起存活，发送不会失败
        let _ = self.cache.reclaim_sender().send(Reclaimed::Field(record));
    }
}

/// 把节点的 `field_changed` 转发给字段包装器
///
/// 注册期间持有字段，有监听器的字段不会被回收；最后一个监听器移除或节点释放时断开。
struct FieldChangeRelay {
    field: Arc<FieldInner>,
    index: usize,
}

impl NodeListener for FieldChangeRelay {
    fn field_changed(&self, index: usize) {
        if index == self.index {
            FieldWrapper(Arc::clone(&self.field)).on_field_changed();
        }
    }
}

/// 节点回调期间打开的访问窗口，离开作用域时恢复
struct AccessWindow<'a> {
    field: &'a FieldWrapper,
    listener: Option<Arc<dyn FieldAccessListener>>,
    previous: bool,
}

impl<'a> AccessWindow<'a> {
    fn open(field: &'a FieldWrapper) -> Self {
        let listener = field.0.cache.access_listener();
        if let Some(listener) = &listener {
            listener.child_requires_access_state_change(true);
        }
        let previous = field.access_permitted();
        field.set_access_permitted(true);
        Self {
            field,
            listener,
            previous,
        }
    }
}

impl Drop for AccessWindow<'_> {
    fn drop(&mut self) {
        self.field.set_access_permitted(self.previous);
        if let Some(listener) = &self.listener {
            listener.child_requires_access_state_change(false);
        }
    }
}

/// 字段包装器（可克隆的共享句柄）
#[derive(Clone)]
pub struct FieldWrapper(Arc<FieldInner>);

impl FieldWrapper {
    pub(crate) fn create(
        cache: WrapperCache,
        node: NodeHandle,
        index: usize,
        decl: FieldDeclaration,
        internal: bool,
    ) -> Self {
        let state = FieldState {
            buffer: FieldBuffer::for_kind(decl.kind()),
            dirty: false,
            access_permitted: false,
            read_only: false,
            disposed: false,
            listeners: EventMulticaster::new(),
            node_listener: None,
        };
        Self(Arc::new(FieldInner {
            node,
            index,
            decl,
            internal,
            cache,
            state: Mutex::new(state),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<FieldInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade_inner(&self) -> Weak<FieldInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn key(&self) -> FieldKey {
        FieldKey {
            node: self.0.node.key(),
            index: self.0.index,
            internal: self.0.internal,
        }
    }

    // ========================================================================
    // 描述
    // ========================================================================

    /// 两个句柄是否为同一个包装器
    pub fn same_wrapper(&self, other: &FieldWrapper) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// 包装器实例标识，仅用于比较与调试
    pub fn wrapper_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn name(&self) -> &str {
        self.0.decl.name()
    }

    pub fn declaration(&self) -> &FieldDeclaration {
        &self.0.decl
    }

    pub fn index(&self) -> usize {
        self.0.index
    }

    pub fn access_kind(&self) -> AccessKind {
        self.0.decl.access()
    }

    pub fn value_kind(&self) -> ValueKind {
        self.0.decl.kind()
    }

    /// 是否为脚本自身的字段
    pub fn is_internal(&self) -> bool {
        self.0.internal
    }

    pub fn is_readable(&self) -> bool {
        is_readable(&self.0.decl, self.0.internal)
    }

    pub fn is_writable(&self) -> bool {
        is_writable(&self.0.decl, self.0.internal, self.0.node.is_setup_finished())
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.0.state).disposed
    }

    pub fn is_read_only(&self) -> bool {
        lock(&self.0.state).read_only
    }

    /// 永久标记为只读
    pub fn mark_read_only(&self) {
        lock(&self.0.state).read_only = true;
    }

    pub fn access_permitted(&self) -> bool {
        lock(&self.0.state).access_permitted
    }

    /// 设置访问许可，并传播给该字段持有的子节点包装器
    pub fn set_access_permitted(&self, permitted: bool) {
        let children = {
            let mut state = lock(&self.0.state);
            if state.access_permitted == permitted {
                return;
            }
            state.access_permitted = permitted;
            state.buffer.node_wrappers()
        };
        for child in children {
            child.set_access_permitted(permitted);
        }
    }

    /// 返回并清除脏标志
    pub fn has_changed(&self) -> bool {
        std::mem::take(&mut lock(&self.0.state).dirty)
    }

    /// 查看脏标志但不清除
    pub fn is_dirty(&self) -> bool {
        lock(&self.0.state).dirty
    }

    /// 逻辑元素个数；非数组字段为 1
    pub fn size(&self) -> BindingResult<usize> {
        self.read(|buffer| Ok(buffer.len()))
    }

    pub fn user_data(&self) -> BindingResult<Option<UserData>> {
        self.ensure_live()?;
        Ok(self.0.node.user_data(self.0.index))
    }

    pub fn set_user_data(&self, data: Option<UserData>) -> BindingResult<()> {
        self.ensure_live()?;
        self.0.node.set_user_data(self.0.index, data);
        Ok(())
    }

    // ========================================================================
    // 访问检查
    // ========================================================================

    fn ensure_live(&self) -> BindingResult<()> {
        if self.is_disposed() {
            return Err(BindingError::DisposedViolation);
        }
        Ok(())
    }

    fn access_check(&self, state: &FieldState, for_write: bool) -> BindingResult<()> {
        if state.disposed {
            return Err(BindingError::DisposedViolation);
        }
        check_access(
            &AccessCheck {
                decl: &self.0.decl,
                internal: self.0.internal,
                read_only: state.read_only,
                access_permitted: state.access_permitted,
                setup_finished: self.0.node.is_setup_finished(),
            },
            for_write,
        )
    }

    fn mismatch(&self, expected: ValueKind) -> BindingError {
        BindingError::ValueKindMismatch {
            field: self.name().to_string(),
            expected,
            found: self.value_kind(),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&FieldBuffer) -> BindingResult<R>) -> BindingResult<R> {
        let state = lock(&self.0.state);
        self.access_check(&state, false)?;
        f(&state.buffer)
    }

    /// 写操作：闭包返回结果以及本次挂入的节点包装器
    ///
    /// 挂入的节点在释放字段锁后实体化，并继承字段的访问许可。
    fn write<R>(
        &self,
        f: impl FnOnce(&mut FieldBuffer, usize) -> BindingResult<(R, Vec<NodeWrapper>)>,
    ) -> BindingResult<R> {
        let (result, attached, permitted) = {
            let mut state = lock(&self.0.state);
            self.access_check(&state, true)?;
            let (result, attached) = f(&mut state.buffer, self.0.cache.array_growth())?;
            state.dirty = true;
            (result, attached, state.access_permitted)
        };

        for node in attached {
            node.realize_attached()?;
            node.set_access_permitted(permitted);
        }
        Ok(result)
    }

    // ========================================================================
    // 通用读写
    // ========================================================================

    pub fn get(&self) -> BindingResult<ScriptValue> {
        self.read(|buffer| Ok(buffer.to_script_value()))
    }

    pub fn set(&self, value: impl Into<ScriptValue>) -> BindingResult<()> {
        let value = value.into();
        let attached = value.node_wrappers();
        let name = self.name();
        self.write(|buffer, _| {
            buffer.assign(name, value)?;
            Ok(((), attached))
        })
    }

    // ========================================================================
    // 类型化读写
    // ========================================================================

    pub fn get_bool(&self) -> BindingResult<bool> {
        self.read(|buffer| match buffer {
            FieldBuffer::Boolean(v) => Ok(*v),
            _ => Err(self.mismatch(ValueKind::Boolean)),
        })
    }

    pub fn set_bool(&self, value: bool) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::Boolean(v) => {
                *v = value;
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::Boolean)),
        })
    }

    pub fn get_scalar(&self) -> BindingResult<f64> {
        self.read(|buffer| match buffer {
            FieldBuffer::Scalar(v) => Ok(*v),
            _ => Err(self.mismatch(ValueKind::Scalar)),
        })
    }

    pub fn set_scalar(&self, value: f64) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::Scalar(v) => {
                *v = value;
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::Scalar)),
        })
    }

    pub fn get_string(&self) -> BindingResult<String> {
        self.read(|buffer| match buffer {
            FieldBuffer::String(v) => Ok(v.clone()),
            _ => Err(self.mismatch(ValueKind::String)),
        })
    }

    pub fn set_string(&self, value: impl Into<String>) -> BindingResult<()> {
        let value = value.into();
        self.write(|buffer, _| match buffer {
            FieldBuffer::String(v) => {
                *v = value;
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::String)),
        })
    }

    pub fn get_strings(&self) -> BindingResult<Vec<String>> {
        self.read(|buffer| match buffer {
            FieldBuffer::StringArray(v) => Ok(v.to_vec()),
            _ => Err(self.mismatch(ValueKind::StringArray)),
        })
    }

    pub fn set_strings(&self, values: &[String]) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::StringArray(v) => {
                v.assign(values);
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::StringArray)),
        })
    }

    pub fn get_image(&self) -> BindingResult<PixelBuffer> {
        self.read(|buffer| match buffer {
            FieldBuffer::Image(v) => Ok(v.clone()),
            _ => Err(self.mismatch(ValueKind::Image)),
        })
    }

    pub fn set_image(&self, image: PixelBuffer) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::Image(v) => {
                *v = image;
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::Image)),
        })
    }

    // ------------------------------------------------------------------------
    // 数值数组
    // ------------------------------------------------------------------------

    pub fn get_scalars(&self) -> BindingResult<Vec<f64>> {
        self.read(|buffer| match buffer {
            FieldBuffer::ScalarArray(v) => Ok(v.to_vec()),
            _ => Err(self.mismatch(ValueKind::ScalarArray)),
        })
    }

    pub fn set_scalars(&self, values: &[f64]) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::ScalarArray(v) => {
                v.assign(values);
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::ScalarArray)),
        })
    }

    pub fn value_at(&self, index: usize) -> BindingResult<f64> {
        self.read(|buffer| match buffer {
            FieldBuffer::ScalarArray(v) => v.get(index).copied().ok_or(
                BindingError::IndexOutOfBounds {
                    index,
                    len: v.len(),
                },
            ),
            _ => Err(self.mismatch(ValueKind::ScalarArray)),
        })
    }

    pub fn set_value_at(&self, index: usize, value: f64) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::ScalarArray(v) => {
                v.set(index, value)?;
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::ScalarArray)),
        })
    }

    pub fn append_value(&self, value: f64) -> BindingResult<()> {
        self.write(|buffer, growth| match buffer {
            FieldBuffer::ScalarArray(v) => {
                v.push(value, growth);
                Ok(((), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::ScalarArray)),
        })
    }

    fn leading_scalars<const N: usize>(&self) -> BindingResult<[f64; N]> {
        self.read(|buffer| match buffer {
            FieldBuffer::ScalarArray(v) => {
                let values = v.as_slice();
                if values.len() < N {
                    return Err(BindingError::IndexOutOfBounds {
                        index: N - 1,
                        len: values.len(),
                    });
                }
                let mut out = [0.0; N];
                out.copy_from_slice(&values[..N]);
                Ok(out)
            }
            _ => Err(self.mismatch(ValueKind::ScalarArray)),
        })
    }

    pub fn get_vec2(&self) -> BindingResult<DVec2> {
        self.leading_scalars::<2>().map(DVec2::from_array)
    }

    pub fn get_vec3(&self) -> BindingResult<DVec3> {
        self.leading_scalars::<3>().map(DVec3::from_array)
    }

    pub fn get_vec4(&self) -> BindingResult<DVec4> {
        self.leading_scalars::<4>().map(DVec4::from_array)
    }

    pub fn set_vec2(&self, value: DVec2) -> BindingResult<()> {
        self.set_scalars(&value.to_array())
    }

    pub fn set_vec3(&self, value: DVec3) -> BindingResult<()> {
        self.set_scalars(&value.to_array())
    }

    pub fn set_vec4(&self, value: DVec4) -> BindingResult<()> {
        self.set_scalars(&value.to_array())
    }

    // ------------------------------------------------------------------------
    // 节点引用
    // ------------------------------------------------------------------------

    pub fn get_node(&self) -> BindingResult<Option<NodeWrapper>> {
        self.read(|buffer| match buffer {
            FieldBuffer::Node(slot) => Ok(slot.wrapper().cloned()),
            _ => Err(self.mismatch(ValueKind::Node)),
        })
    }

    pub fn set_node(&self, node: Option<&NodeWrapper>) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::Node(slot) => {
                *slot = NodeSlot::from_wrapper(node)?;
                Ok(((), node.cloned().into_iter().collect()))
            }
            _ => Err(self.mismatch(ValueKind::Node)),
        })
    }

    pub fn get_nodes(&self) -> BindingResult<Vec<Option<NodeWrapper>>> {
        self.read(|buffer| match buffer {
            FieldBuffer::NodeArray(slots) => {
                Ok(slots.as_slice().iter().map(|s| s.wrapper().cloned()).collect())
            }
            _ => Err(self.mismatch(ValueKind::NodeArray)),
        })
    }

    pub fn set_nodes(&self, nodes: &[NodeWrapper]) -> BindingResult<()> {
        self.set(ScriptValue::NodeArray(
            nodes.iter().cloned().map(Some).collect(),
        ))
    }

    pub fn node_at(&self, index: usize) -> BindingResult<Option<NodeWrapper>> {
        self.read(|buffer| match buffer {
            FieldBuffer::NodeArray(slots) => slots
                .get(index)
                .map(|s| s.wrapper().cloned())
                .ok_or(BindingError::IndexOutOfBounds {
                    index,
                    len: slots.len(),
                }),
            _ => Err(self.mismatch(ValueKind::NodeArray)),
        })
    }

    pub fn set_node_at(&self, index: usize, node: Option<&NodeWrapper>) -> BindingResult<()> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::NodeArray(slots) => {
                slots.set(index, NodeSlot::from_wrapper(node)?)?;
                Ok(((), node.cloned().into_iter().collect()))
            }
            _ => Err(self.mismatch(ValueKind::NodeArray)),
        })
    }

    pub fn append_node(&self, node: &NodeWrapper) -> BindingResult<()> {
        self.write(|buffer, growth| match buffer {
            FieldBuffer::NodeArray(slots) => {
                slots.push(NodeSlot::from_wrapper(Some(node))?, growth);
                Ok(((), vec![node.clone()]))
            }
            _ => Err(self.mismatch(ValueKind::NodeArray)),
        })
    }

    pub fn insert_node(&self, index: usize, node: &NodeWrapper) -> BindingResult<()> {
        self.write(|buffer, growth| match buffer {
            FieldBuffer::NodeArray(slots) => {
                slots.insert(index, NodeSlot::from_wrapper(Some(node))?, growth)?;
                Ok(((), vec![node.clone()]))
            }
            _ => Err(self.mismatch(ValueKind::NodeArray)),
        })
    }

    /// 移除并返回指定位置的节点
    pub fn remove_node(&self, index: usize) -> BindingResult<Option<NodeWrapper>> {
        self.write(|buffer, _| match buffer {
            FieldBuffer::NodeArray(slots) => {
                let removed = slots.remove(index)?;
                Ok((removed.wrapper().cloned(), Vec::new()))
            }
            _ => Err(self.mismatch(ValueKind::NodeArray)),
        })
    }

    /// 当前持有的子节点包装器
    pub(crate) fn child_nodes(&self) -> Vec<NodeWrapper> {
        lock(&self.0.state).buffer.node_wrappers()
    }

    // ========================================================================
    // 监听器
    // ========================================================================

    /// 添加事件监听器
    ///
    /// 字段当前不可读时返回 `NotReadableViolation`。外部字段在第一个监听器加入时
    /// 向节点注册变更通知。
    pub fn add_listener(&self, listener: Arc<dyn FieldEventListener>) -> BindingResult<()> {
        let relay = {
            let mut state = lock(&self.0.state);
            if state.disposed {
                return Err(BindingError::DisposedViolation);
            }
            if !self.is_readable() {
                return Err(BindingError::NotReadableViolation(self.name().to_string()));
            }

            let was_empty = state.listeners.is_empty();
            state.listeners = state.listeners.add(listener);

            if was_empty && !self.0.internal && state.node_listener.is_none() {
                let relay: Arc<dyn NodeListener> = Arc::new(FieldChangeRelay {
                    field: Arc::clone(&self.0),
                    index: self.0.index,
                });
                state.node_listener = Some(Arc::clone(&relay));
                Some(relay)
            } else {
                None
            }
        };

        if let Some(relay) = relay {
            self.0.node.add_node_listener(relay);
        }
        Ok(())
    }

    /// 移除事件监听器；最后一个监听器移除时注销节点通知
    pub fn remove_listener(&self, listener: &Arc<dyn FieldEventListener>) -> BindingResult<()> {
        let relay = {
            let mut state = lock(&self.0.state);
            if state.disposed {
                return Err(BindingError::DisposedViolation);
            }
            if !self.is_readable() {
                return Err(BindingError::NotReadableViolation(self.name().to_string()));
            }

            state.listeners = state.listeners.remove(listener);
            if state.listeners.is_empty() {
                state.node_listener.take()
            } else {
                None
            }
        };

        if let Some(relay) = relay {
            self.0.node.remove_node_listener(&relay);
        }
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.0.state).listeners.len()
    }

    // ========================================================================
    // 通知
    // ========================================================================

    /// 向监听器链分发事件，返回失败的监听器数量
    pub fn fire_notification(&self, timestamp: f64) -> usize {
        let listeners = {
            let state = lock(&self.0.state);
            if state.disposed || state.listeners.is_empty() {
                return 0;
            }
            state.listeners.clone()
        };

        let user_data = self.0.node.user_data(self.0.index);
        let events = self.0.cache.events();
        let event = events.acquire(self.clone(), timestamp, user_data);
        let failures = listeners.dispatch(&event, self.0.cache.reporter().as_ref());
        events.release(event);
        failures
    }

    /// 节点发出的字段变更：拉取新值，在打开的访问窗口中分发
    fn on_field_changed(&self) {
        if self.is_disposed() {
            return;
        }

        if let Err(err) = self.update_field() {
            let message = format!("Unable to read changed field `{}`", self.name());
            self.0
                .cache
                .reporter()
                .warning_report(&message, Some(&ScriptError::from(err)));
        }

        let _window = AccessWindow::open(self);
        self.fire_notification(current_timestamp_f64());
    }

    // ========================================================================
    // 同步
    // ========================================================================

    /// 把本地值写回节点并清除脏标志
    pub fn update_node(&self) -> BindingResult<()> {
        let value = {
            let mut state = lock(&self.0.state);
            if state.disposed {
                return Err(BindingError::DisposedViolation);
            }
            state.dirty = false;
            state.buffer.to_value()
        };

        if let Err(err) = self.0.node.set_value(self.0.index, value) {
            lock(&self.0.state).dirty = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// 从节点拉取最新值并清除脏标志；当前视角不可读的字段不拉取
    pub fn update_field(&self) -> BindingResult<()> {
        if !self.is_readable() {
            return Ok(());
        }

        let (fresh, permitted) = {
            let mut state = lock(&self.0.state);
            if state.disposed {
                return Err(BindingError::DisposedViolation);
            }
            let fresh = state
                .buffer
                .pull(&self.0.node, self.0.index, &self.0.cache)?;
            state.dirty = false;
            (fresh, state.access_permitted)
        };

        for node in fresh {
            node.set_access_permitted(permitted);
        }
        Ok(())
    }

    /// 本地值未修改时才拉取，避免覆盖尚未写回的脚本写入
    pub(crate) fn refresh(&self) -> BindingResult<()> {
        if self.is_dirty() {
            return Ok(());
        }
        self.update_field()
    }

    /// 先递归写回子节点，再写回本字段
    pub fn update_node_and_children(&self) -> BindingResult<()> {
        self.push_tree(&mut HashSet::new())
    }

    /// 先拉取本字段，再递归拉取子节点
    pub fn update_field_and_children(&self) -> BindingResult<()> {
        self.pull_tree(&mut HashSet::new())
    }

    pub(crate) fn push_tree(&self, visited: &mut HashSet<NodeKey>) -> BindingResult<()> {
        for child in self.child_nodes() {
            child.push_tree(visited)?;
        }
        if self.is_dirty() {
            self.update_node()?;
        }
        Ok(())
    }

    pub(crate) fn pull_tree(&self, visited: &mut HashSet<NodeKey>) -> BindingResult<()> {
        self.update_field()?;
        for child in self.child_nodes() {
            child.pull_tree(visited)?;
        }
        Ok(())
    }

    /// 随所属节点包装器一起失效
    pub(crate) fn mark_disposed(&self) {
        let relay = {
            let mut state = lock(&self.0.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.access_permitted = false;
            state.listeners = EventMulticaster::new();
            state.node_listener.take()
        };

        if let Some(relay) = relay {
            self.0.node.remove_node_listener(&relay);
        }
        self.0.cache.forget_field(self.key(), &self.downgrade_inner());
    }
}

impl fmt::Debug for FieldWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldWrapper")
            .field("node", &self.0.node.node_name())
            .field("field", &self.name())
            .field("internal", &self.0.internal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::event::FieldEvent;
    use crate::core::error::ScriptResult;
    use crate::core::ErrorAggregator;
    use crate::engine::{FieldValue, MemoryNode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> (Arc<MemoryNode>, NodeHandle) {
        let node = MemoryNode::shared(
            "Sample",
            vec![
                FieldDeclaration::new("a", AccessKind::InputOutput, ValueKind::Scalar),
                FieldDeclaration::new("b", AccessKind::OutputOnly, ValueKind::Scalar),
                FieldDeclaration::new("points", AccessKind::InputOutput, ValueKind::ScalarArray),
                FieldDeclaration::new("label", AccessKind::InitializeOnly, ValueKind::String),
                FieldDeclaration::new("set_flag", AccessKind::InputOnly, ValueKind::Boolean),
            ],
        );
        let handle = node.handle();
        (node, handle)
    }

    fn aggregating_cache() -> (WrapperCache, Arc<ErrorAggregator>) {
        let reporter = Arc::new(ErrorAggregator::new());
        let cache = WrapperCache::new(
            &crate::config::BindingConfig::default(),
            crate::binding::NodeWrapperFactory::default(),
            reporter.clone(),
        );
        (cache, reporter)
    }

    #[test]
    fn test_set_then_update_node() {
        let (memory, node) = sample();
        let cache = WrapperCache::default();
        let a = cache.field_wrapper(&node, "a", false).unwrap();

        a.set_access_permitted(true);
        a.set_scalar(5.0).unwrap();
        assert!(a.has_changed());
        assert!(!a.has_changed());

        a.set_scalar(5.0).unwrap();
        a.update_node().unwrap();
        assert_eq!(memory.value_of("a"), Some(FieldValue::Scalar(5.0)));
        assert!(!a.has_changed());
    }

    fn media_node() -> Arc<MemoryNode> {
        MemoryNode::shared(
            "Media",
            vec![
                FieldDeclaration::new("names", AccessKind::InputOutput, ValueKind::StringArray),
                FieldDeclaration::new("texture", AccessKind::InputOutput, ValueKind::Image),
            ],
        )
    }

    #[test]
    fn test_string_array_pull_and_push() {
        let memory = media_node();
        let cache = WrapperCache::default();
        let names = cache.field_wrapper(&memory.handle(), "names", false).unwrap();
        names.set_access_permitted(true);

        let pulled: Vec<String> = ["left", "middle", "right"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        memory
            .set_engine_value(0, FieldValue::StringArray(pulled.clone()))
            .unwrap();
        names.update_field().unwrap();
        assert_eq!(names.get_strings().unwrap(), pulled);
        assert_eq!(names.size().unwrap(), 3);

        // 缩短后推回的值不带旧的尾部元素
        names.set_strings(&["only".to_string()]).unwrap();
        assert!(names.is_dirty());
        names.update_node().unwrap();
        assert_eq!(
            memory.value_of("names"),
            Some(FieldValue::StringArray(vec!["only".to_string()]))
        );

        memory
            .set_engine_value(0, FieldValue::StringArray(vec!["a".into(), "b".into()]))
            .unwrap();
        names.update_field().unwrap();
        assert_eq!(names.get_strings().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(
            names.get_image(),
            Err(BindingError::ValueKindMismatch { .. })
        ));
    }

    #[test]
    fn test_image_pull_and_push() {
        let memory = media_node();
        let cache = WrapperCache::default();
        let texture = cache.field_wrapper(&memory.handle(), "texture", false).unwrap();
        texture.set_access_permitted(true);

        let checker = PixelBuffer::new(2, 2, 1, vec![0x00, 0xff, 0xff, 0x00]);
        assert!(checker.is_consistent());
        memory
            .set_engine_value(1, FieldValue::Image(checker.clone()))
            .unwrap();
        texture.update_field().unwrap();
        assert_eq!(texture.get_image().unwrap(), checker);
        assert_eq!(texture.get(), Ok(ScriptValue::Image(checker.clone())));

        let solid = PixelBuffer::new(1, 1, 4, vec![0x1020_30ff]);
        texture.set_image(solid.clone()).unwrap();
        assert_eq!(memory.value_of("texture"), Some(FieldValue::Image(checker)));
        texture.update_node().unwrap();
        assert_eq!(memory.value_of("texture"), Some(FieldValue::Image(solid)));
        assert!(!texture.has_changed());
    }

    #[test]
    fn test_timing_and_direction_errors() {
        let (_memory, node) = sample();
        let cache = WrapperCache::default();
        let a = cache.field_wrapper(&node, "a", false).unwrap();
        let set_flag = cache.field_wrapper(&node, "set_flag", false).unwrap();

        assert!(matches!(a.get_scalar(), Err(BindingError::TimingViolation(_))));

        set_flag.set_access_permitted(true);
        assert!(matches!(
            set_flag.get_bool(),
            Err(BindingError::NotReadableViolation(_))
        ));
        // 节点尚未完成初始化，外部不能写 input-only
        assert!(matches!(
            set_flag.set_bool(true),
            Err(BindingError::NotWritableViolation(_))
        ));
        node.setup_finished();
        assert!(set_flag.set_bool(true).is_ok());
    }

    #[test]
    fn test_read_only_blocks_writes_only() {
        let (_memory, node) = sample();
        let cache = WrapperCache::default();
        let a = cache.field_wrapper(&node, "a", true).unwrap();
        a.set_access_permitted(true);
        a.mark_read_only();

        assert!(a.get_scalar().is_ok());
        assert!(matches!(
            a.set_scalar(1.0),
            Err(BindingError::ReadOnlyViolation(_))
        ));
    }

    #[test]
    fn test_kind_mismatch() {
        let (_memory, node) = sample();
        let cache = WrapperCache::default();
        let a = cache.field_wrapper(&node, "a", false).unwrap();
        a.set_access_permitted(true);

        assert_eq!(
            a.get_string(),
            Err(BindingError::ValueKindMismatch {
                field: "a".to_string(),
                expected: ValueKind::String,
                found: ValueKind::Scalar,
            })
        );
        assert!(a.set(true).is_err());
        assert!(!a.is_dirty());
    }

    #[test]
    fn test_update_field_pulls_and_clears_dirty() {
        let (memory, node) = sample();
        let cache = WrapperCache::default();
        let points = cache.field_wrapper(&node, "points", false).unwrap();
        points.set_access_permitted(true);

        memory
            .set_engine_value(2, FieldValue::ScalarArray(vec![1.0, 2.0, 3.0]))
            .unwrap();
        points.append_value(9.0).unwrap();
        assert!(points.is_dirty());

        points.update_field().unwrap();
        assert!(!points.is_dirty());
        assert_eq!(points.get_scalars().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(points.get_vec3().unwrap(), DVec3::new(1.0, 2.0, 3.0));
        assert!(matches!(
            points.get_vec4(),
            Err(BindingError::IndexOutOfBounds { index: 3, len: 3 })
        ));

        points.set_value_at(1, 7.0).unwrap();
        assert_eq!(points.value_at(1).unwrap(), 7.0);
        assert!(points.value_at(5).is_err());
    }

    #[test]
    fn test_unreadable_field_is_not_pulled() {
        let (memory, node) = sample();
        let cache = WrapperCache::default();
        let label = cache.field_wrapper(&node, "label", false).unwrap();
        memory
            .set_engine_value(3, FieldValue::String("engine".to_string()))
            .unwrap();

        label.update_field().unwrap();
        label.set_access_permitted(true);
        assert!(matches!(
            label.get_string(),
            Err(BindingError::NotReadableViolation(_))
        ));
    }

    #[test]
    fn test_add_listener_requires_readable() {
        let (memory, node) = sample();
        let cache = WrapperCache::default();
        let set_flag = cache.field_wrapper(&node, "set_flag", false).unwrap();
        let listener: Arc<dyn FieldEventListener> =
            Arc::new(|_: &FieldEvent| -> ScriptResult<()> { Ok(()) });

        assert!(matches!(
            set_flag.add_listener(listener),
            Err(BindingError::NotReadableViolation(_))
        ));
        assert_eq!(memory.listener_count(), 0);
    }

    #[test]
    fn test_node_listener_registered_once() {
        let (memory, node) = sample();
        let cache = WrapperCache::default();
        let b = cache.field_wrapper(&node, "b", false).unwrap();

        let first: Arc<dyn FieldEventListener> =
            Arc::new(|_: &FieldEvent| -> ScriptResult<()> { Ok(()) });
        let second: Arc<dyn FieldEventListener> =
            Arc::new(|_: &FieldEvent| -> ScriptResult<()> { Ok(()) });

        b.add_listener(Arc::clone(&first)).unwrap();
        b.add_listener(Arc::clone(&second)).unwrap();
        assert_eq!(memory.listener_count(), 1);
        assert_eq!(b.listener_count(), 2);

        b.remove_listener(&first).unwrap();
        assert_eq!(memory.listener_count(), 1);
        b.remove_listener(&second).unwrap();
        assert_eq!(memory.listener_count(), 0);
    }

    #[test]
    fn test_node_change_pulls_and_opens_window() {
        let (memory, node) = sample();
        let cache = WrapperCache::default();
        let b = cache.field_wrapper(&node, "b", false).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_listener = Arc::clone(&seen);
        b.add_listener(Arc::new(move |event: &FieldEvent| -> ScriptResult<()> {
            let source = event.source().expect("event source");
            seen_in_listener.lock().unwrap().push(source.get_scalar()?);
            Ok(())
        }))
        .unwrap();

        memory.set_engine_value(1, FieldValue::Scalar(0.25)).unwrap();
        memory.notify_changed(1);
        // 其他字段的通知被忽略
        memory.notify_changed(0);

        assert_eq!(*seen.lock().unwrap(), vec![0.25]);
        assert!(!b.access_permitted());
    }

    #[test]
    fn test_failing_listener_reported_once() {
        let (_memory, node) = sample();
        let (cache, reporter) = aggregating_cache();
        let a = cache.field_wrapper(&node, "a", true).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        a.add_listener(Arc::new(|_: &FieldEvent| -> ScriptResult<()> {
            Err(ScriptError::runtime("first listener fails"))
        }))
        .unwrap();
        a.add_listener(Arc::new(move |event: &FieldEvent| -> ScriptResult<()> {
            assert_eq!(event.timestamp(), 12.5);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        assert_eq!(a.fire_notification(12.5), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn test_event_carries_user_data() {
        let (_memory, node) = sample();
        let cache = WrapperCache::default();
        let a = cache.field_wrapper(&node, "a", true).unwrap();
        let data: UserData = Arc::new(42_u32);
        a.set_user_data(Some(data)).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = Arc::clone(&seen);
        a.add_listener(Arc::new(move |event: &FieldEvent| -> ScriptResult<()> {
            let value = event
                .user_data()
                .and_then(|d| d.downcast_ref::<u32>())
                .copied()
                .unwrap_or_default();
            seen_in_listener.store(value as usize, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        a.fire_notification(0.0);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
