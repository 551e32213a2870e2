//! 值同步
//!
//! 每个字段包装器持有一个本地缓冲区 [`FieldBuffer`]。`pull` 从节点读取最新值，
//! `to_value` 生成推回节点的值。数组使用只增不减的 [`ArrayBuffer`]：
//! 容量取当前容量与所需容量的较大者，缩短时只减少逻辑长度。
//!
//! 节点引用逐个下标比较新旧句柄：句柄未变的元素保留原有节点包装器，
//! 变为空的元素丢弃包装器，变为新节点的元素通过缓存查找或创建包装器。

use super::cache::WrapperCache;
use super::node::NodeWrapper;
use crate::core::error::{BindingError, BindingResult, EngineError};
use crate::engine::{FieldValue, NodeHandle, PixelBuffer, ValueKind};

// ============================================================================
// 只增缓冲区
// ============================================================================

/// 只增不减的数组缓冲区
///
/// `data[len..]` 始终保持默认值，缩短后的尾部不会继续持有旧元素。
#[derive(Debug, Clone, Default)]
pub struct ArrayBuffer<T> {
    data: Vec<T>,
    len: usize,
}

impl<T: Clone + Default> ArrayBuffer<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 已分配的槽位数
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 保证至少有 `required` 个槽位；永不缩小
    pub fn ensure_capacity(&mut self, required: usize) {
        if required > self.data.len() {
            self.data.resize(required, T::default());
        }
    }

    fn clear_tail(&mut self, new_len: usize) {
        if new_len < self.len {
            for slot in &mut self.data[new_len..self.len] {
                *slot = T::default();
            }
        }
    }

    /// 设置逻辑长度，新增的元素为默认值
    pub fn set_len(&mut self, len: usize) {
        if len < self.len {
            self.clear_tail(len);
        } else {
            self.ensure_capacity(len);
        }
        self.len = len;
    }

    /// 用给定数据整体替换内容
    pub fn assign(&mut self, values: &[T]) {
        self.ensure_capacity(values.len());
        self.data[..values.len()].clone_from_slice(values);
        self.clear_tail(values.len());
        self.len = values.len();
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.set_len(len);
        }
    }

    /// 追加元素，槽位不足时按 `growth` 扩容
    pub fn push(&mut self, value: T, growth: usize) {
        if self.len == self.data.len() {
            self.ensure_capacity(self.len + growth.max(1));
        }
        self.data[self.len] = value;
        self.len += 1;
    }

    pub fn insert(&mut self, index: usize, value: T, growth: usize) -> BindingResult<()> {
        if index > self.len {
            return Err(BindingError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        if self.len == self.data.len() {
            self.ensure_capacity(self.len + growth.max(1));
        }
        // data[len] 是空闲槽位，右旋后落到 index
        self.data[index..=self.len].rotate_right(1);
        self.data[index] = value;
        self.len += 1;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> BindingResult<T> {
        if index >= self.len {
            return Err(BindingError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        self.data[index..self.len].rotate_left(1);
        self.len -= 1;
        Ok(std::mem::take(&mut self.data[self.len]))
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn set(&mut self, index: usize, value: T) -> BindingResult<()> {
        let len = self.len;
        let slot = self
            .as_mut_slice()
            .get_mut(index)
            .ok_or(BindingError::IndexOutOfBounds { index, len })?;
        *slot = value;
        Ok(())
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data[..self.len]
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }
}

// ============================================================================
// 节点槽位
// ============================================================================

/// 一个节点引用及其包装器
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeSlot {
    handle: Option<NodeHandle>,
    wrapper: Option<NodeWrapper>,
}

impl NodeSlot {
    pub(crate) fn from_wrapper(wrapper: Option<&NodeWrapper>) -> BindingResult<Self> {
        match wrapper {
            None => Ok(Self::default()),
            Some(w) => Ok(Self {
                handle: Some(w.handle()?),
                wrapper: Some(w.clone()),
            }),
        }
    }

    pub(crate) fn wrapper(&self) -> Option<&NodeWrapper> {
        self.wrapper.as_ref()
    }

    /// 与引擎中的新句柄对齐；新绑定的包装器追加到 `fresh`
    fn sync(
        &mut self,
        incoming: Option<NodeHandle>,
        cache: &WrapperCache,
        fresh: &mut Vec<NodeWrapper>,
    ) {
        let wrapper_live = self.wrapper.as_ref().map_or(true, |w| !w.is_disposed());
        if self.handle == incoming && wrapper_live {
            return;
        }

        match incoming {
            None => {
                self.handle = None;
                self.wrapper = None;
            }
            Some(handle) => {
                let wrapper = cache.lookup_node_wrapper(&handle);
                fresh.push(wrapper.clone());
                self.handle = Some(handle);
                self.wrapper = Some(wrapper);
            }
        }
    }
}

// ============================================================================
// 字段缓冲区
// ============================================================================

/// 字段包装器的本地值
#[derive(Debug, Clone)]
pub(crate) enum FieldBuffer {
    Boolean(bool),
    Scalar(f64),
    ScalarArray(ArrayBuffer<f64>),
    String(String),
    StringArray(ArrayBuffer<String>),
    Node(NodeSlot),
    NodeArray(ArrayBuffer<NodeSlot>),
    Image(PixelBuffer),
}

impl Default for FieldBuffer {
    fn default() -> Self {
        FieldBuffer::Boolean(false)
    }
}

impl FieldBuffer {
    pub(crate) fn for_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => FieldBuffer::Boolean(false),
            ValueKind::Scalar => FieldBuffer::Scalar(0.0),
            ValueKind::ScalarArray => FieldBuffer::ScalarArray(ArrayBuffer::new()),
            ValueKind::String => FieldBuffer::String(String::new()),
            ValueKind::StringArray => FieldBuffer::StringArray(ArrayBuffer::new()),
            ValueKind::Node => FieldBuffer::Node(NodeSlot::default()),
            ValueKind::NodeArray => FieldBuffer::NodeArray(ArrayBuffer::new()),
            ValueKind::Image => FieldBuffer::Image(PixelBuffer::default()),
        }
    }

    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            FieldBuffer::Boolean(_) => ValueKind::Boolean,
            FieldBuffer::Scalar(_) => ValueKind::Scalar,
            FieldBuffer::ScalarArray(_) => ValueKind::ScalarArray,
            FieldBuffer::String(_) => ValueKind::String,
            FieldBuffer::StringArray(_) => ValueKind::StringArray,
            FieldBuffer::Node(_) => ValueKind::Node,
            FieldBuffer::NodeArray(_) => ValueKind::NodeArray,
            FieldBuffer::Image(_) => ValueKind::Image,
        }
    }

    /// 逻辑元素个数；标量类型为 1
    pub(crate) fn len(&self) -> usize {
        match self {
            FieldBuffer::ScalarArray(values) => values.len(),
            FieldBuffer::StringArray(values) => values.len(),
            FieldBuffer::NodeArray(slots) => slots.len(),
            _ => 1,
        }
    }

    /// 从节点读取最新值
    ///
    /// 返回本次新绑定的节点包装器，调用方需要在释放字段锁后把访问标志传播给它们。
    pub(crate) fn pull(
        &mut self,
        node: &NodeHandle,
        index: usize,
        cache: &WrapperCache,
    ) -> BindingResult<Vec<NodeWrapper>> {
        let value = node.field_value(index)?;
        let mut fresh = Vec::new();

        match (self, value) {
            (FieldBuffer::Boolean(local), FieldValue::Boolean(v)) => *local = v,
            (FieldBuffer::Scalar(local), FieldValue::Scalar(v)) => *local = v,
            (FieldBuffer::ScalarArray(local), FieldValue::ScalarArray(v)) => local.assign(&v),
            (FieldBuffer::String(local), FieldValue::String(v)) => *local = v,
            (FieldBuffer::StringArray(local), FieldValue::StringArray(v)) => local.assign(&v),
            (FieldBuffer::Image(local), FieldValue::Image(v)) => *local = v,
            (FieldBuffer::Node(slot), FieldValue::Node(handle)) => {
                slot.sync(handle, cache, &mut fresh);
            }
            (FieldBuffer::NodeArray(slots), FieldValue::NodeArray(handles)) => {
                slots.set_len(handles.len());
                for (slot, handle) in slots.as_mut_slice().iter_mut().zip(handles) {
                    slot.sync(handle, cache, &mut fresh);
                }
            }
            (local, value) => {
                return Err(EngineError::KindMismatch {
                    index,
                    expected: local.kind(),
                    found: value.kind(),
                }
                .into());
            }
        }

        Ok(fresh)
    }

    /// 生成推回节点的值
    pub(crate) fn to_value(&self) -> FieldValue {
        match self {
            FieldBuffer::Boolean(v) => FieldValue::Boolean(*v),
            FieldBuffer::Scalar(v) => FieldValue::Scalar(*v),
            FieldBuffer::ScalarArray(v) => FieldValue::ScalarArray(v.to_vec()),
            FieldBuffer::String(v) => FieldValue::String(v.clone()),
            FieldBuffer::StringArray(v) => FieldValue::StringArray(v.to_vec()),
            FieldBuffer::Node(slot) => FieldValue::Node(slot.handle.clone()),
            FieldBuffer::NodeArray(slots) => FieldValue::NodeArray(
                slots.as_slice().iter().map(|s| s.handle.clone()).collect(),
            ),
            FieldBuffer::Image(v) => FieldValue::Image(v.clone()),
        }
    }

    /// 生成交给脚本的值
    pub(crate) fn to_script_value(&self) -> ScriptValue {
        match self {
            FieldBuffer::Boolean(v) => ScriptValue::Boolean(*v),
            FieldBuffer::Scalar(v) => ScriptValue::Scalar(*v),
            FieldBuffer::ScalarArray(v) => ScriptValue::ScalarArray(v.to_vec()),
            FieldBuffer::String(v) => ScriptValue::String(v.clone()),
            FieldBuffer::StringArray(v) => ScriptValue::StringArray(v.to_vec()),
            FieldBuffer::Node(slot) => ScriptValue::Node(slot.wrapper.clone()),
            FieldBuffer::NodeArray(slots) => ScriptValue::NodeArray(
                slots.as_slice().iter().map(|s| s.wrapper.clone()).collect(),
            ),
            FieldBuffer::Image(v) => ScriptValue::Image(v.clone()),
        }
    }

    /// 用脚本提供的值替换本地值
    pub(crate) fn assign(&mut self, field: &str, value: ScriptValue) -> BindingResult<()> {
        match (self, value) {
            (FieldBuffer::Boolean(local), ScriptValue::Boolean(v)) => *local = v,
            (FieldBuffer::Scalar(local), ScriptValue::Scalar(v)) => *local = v,
            (FieldBuffer::ScalarArray(local), ScriptValue::ScalarArray(v)) => local.assign(&v),
            (FieldBuffer::String(local), ScriptValue::String(v)) => *local = v,
            (FieldBuffer::StringArray(local), ScriptValue::StringArray(v)) => local.assign(&v),
            (FieldBuffer::Image(local), ScriptValue::Image(v)) => *local = v,
            (FieldBuffer::Node(slot), ScriptValue::Node(wrapper)) => {
                *slot = NodeSlot::from_wrapper(wrapper.as_ref())?;
            }
            (FieldBuffer::NodeArray(slots), ScriptValue::NodeArray(wrappers)) => {
                let incoming = wrappers
                    .iter()
                    .map(|w| NodeSlot::from_wrapper(w.as_ref()))
                    .collect::<BindingResult<Vec<_>>>()?;
                slots.assign(&incoming);
            }
            (local, value) => {
                return Err(BindingError::ValueKindMismatch {
                    field: field.to_string(),
                    expected: value.kind(),
                    found: local.kind(),
                });
            }
        }
        Ok(())
    }

    /// 当前持有的全部子节点包装器
    pub(crate) fn node_wrappers(&self) -> Vec<NodeWrapper> {
        match self {
            FieldBuffer::Node(slot) => slot.wrapper.iter().cloned().collect(),
            FieldBuffer::NodeArray(slots) => slots
                .as_slice()
                .iter()
                .filter_map(|s| s.wrapper.clone())
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// 脚本侧的值
// ============================================================================

/// 脚本读写字段时使用的值
///
/// 节点引用总是以 [`NodeWrapper`] 出现，引擎内部句柄不会交给脚本。
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Boolean(bool),
    Scalar(f64),
    ScalarArray(Vec<f64>),
    String(String),
    StringArray(Vec<String>),
    Node(Option<NodeWrapper>),
    NodeArray(Vec<Option<NodeWrapper>>),
    Image(PixelBuffer),
}

impl ScriptValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ScriptValue::Boolean(_) => ValueKind::Boolean,
            ScriptValue::Scalar(_) => ValueKind::Scalar,
            ScriptValue::ScalarArray(_) => ValueKind::ScalarArray,
            ScriptValue::String(_) => ValueKind::String,
            ScriptValue::StringArray(_) => ValueKind::StringArray,
            ScriptValue::Node(_) => ValueKind::Node,
            ScriptValue::NodeArray(_) => ValueKind::NodeArray,
            ScriptValue::Image(_) => ValueKind::Image,
        }
    }

    /// 值中包含的节点包装器
    pub(crate) fn node_wrappers(&self) -> Vec<NodeWrapper> {
        match self {
            ScriptValue::Node(w) => w.iter().cloned().collect(),
            ScriptValue::NodeArray(ws) => ws.iter().flatten().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(v: bool) -> Self {
        ScriptValue::Boolean(v)
    }
}

impl From<f64> for ScriptValue {
    fn from(v: f64) -> Self {
        ScriptValue::Scalar(v)
    }
}

impl From<Vec<f64>> for ScriptValue {
    fn from(v: Vec<f64>) -> Self {
        ScriptValue::ScalarArray(v)
    }
}

impl From<&str> for ScriptValue {
    fn from(v: &str) -> Self {
        ScriptValue::String(v.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(v: String) -> Self {
        ScriptValue::String(v)
    }
}

impl From<Vec<String>> for ScriptValue {
    fn from(v: Vec<String>) -> Self {
        ScriptValue::StringArray(v)
    }
}

impl From<NodeWrapper> for ScriptValue {
    fn from(v: NodeWrapper) -> Self {
        ScriptValue::Node(Some(v))
    }
}

impl From<PixelBuffer> for ScriptValue {
    fn from(v: PixelBuffer) -> Self {
        ScriptValue::Image(v)
    }
}
