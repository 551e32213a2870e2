//! 脚本实现接口

use crate::binding::{ExecutionContext, FieldWrapper, NodeWrapper};
use crate::core::error::{BindingError, BindingResult, ScriptResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 用户脚本
///
/// 每个回调都在打开的访问窗口中执行。回调返回的错误或 panic 会被控制器捕获并报告，
/// 不会中断当前的协议步骤。
pub trait ScriptImplementation: Send {
    fn initialize(&mut self, context: &ScriptContext) -> ScriptResult<()>;

    /// 是否需要每帧在事件分发前收到 `prepare_events`
    fn is_per_frame_observer(&self) -> bool {
        false
    }

    fn prepare_events(&mut self, _context: &ScriptContext) -> ScriptResult<()> {
        Ok(())
    }

    fn events_processed(&mut self, _context: &ScriptContext) -> ScriptResult<()> {
        Ok(())
    }

    fn shutdown(&mut self, _context: &ScriptContext) -> ScriptResult<()> {
        Ok(())
    }
}

/// 脚本在回调中看到的环境
#[derive(Clone)]
pub struct ScriptContext {
    script_node: NodeWrapper,
    fields: Arc<BTreeMap<String, FieldWrapper>>,
    execution: ExecutionContext,
    direct_output: bool,
}

impl ScriptContext {
    pub(crate) fn new(
        script_node: NodeWrapper,
        fields: BTreeMap<String, FieldWrapper>,
        execution: ExecutionContext,
        direct_output: bool,
    ) -> Self {
        Self {
            script_node,
            fields: Arc::new(fields),
            execution,
            direct_output,
        }
    }

    /// 脚本节点本身（外部视角）
    pub fn script_node(&self) -> &NodeWrapper {
        &self.script_node
    }

    /// 按名称取脚本自身的字段
    pub fn field(&self, name: &str) -> BindingResult<FieldWrapper> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::InvalidFieldViolation {
                node: self.script_node.node_name().to_string(),
                field: name.to_string(),
            })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldWrapper> {
        self.fields.values()
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn is_direct_output(&self) -> bool {
        self.direct_output
    }
}
