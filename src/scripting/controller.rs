//! 脚本调用控制器
//!
//! 驱动一个脚本实例的生命周期：
//!
//! ```text
//! Uninitialized --initialize--> Idle <--queue_event / send_events--> EventsPending
//!                                 \______________ shutdown ______________/
//!                                                  |
//!                                               ShutDown
//! ```
//!
//! 所有用户回调都在访问窗口内执行。窗口按深度计数嵌套：节点通知在回调内部再次
//! 打开窗口时，只有最外层关闭才真正禁用字段。

use super::script::{ScriptContext, ScriptImplementation};
use crate::binding::{ExecutionContext, FieldAccessListener, FieldWrapper, WrapperCache};
use crate::config::ScriptConfig;
use crate::core::error::{BindingError, BindingResult, ScriptError, ScriptResult};
use crate::core::reporting::ErrorReporter;
use crate::core::utils::lock;
use crate::engine::{AccessKind, FieldValue, NodeHandle, ValueKind};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Idle,
    EventsPending,
    ShutDown,
}

// ============================================================================
// 访问窗口
// ============================================================================

struct ControllerShared {
    cache: WrapperCache,
    execution: ExecutionContext,
    depth: Mutex<usize>,
    fields: Mutex<Vec<FieldWrapper>>,
    used_nodes: Mutex<Vec<FieldWrapper>>,
    direct_output: AtomicBool,
}

impl ControllerShared {
    fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        self.cache.reporter()
    }

    /// 调整窗口深度；只有 0 与 1 之间的跃迁会真正开关字段
    fn change_access(&self, enable: bool) {
        let transition = {
            let mut depth = lock(&self.depth);
            if enable {
                *depth += 1;
                *depth == 1
            } else {
                if *depth == 0 {
                    return;
                }
                *depth -= 1;
                *depth == 0
            }
        };

        if !transition {
            return;
        }
        if enable {
            self.enable_fields();
        } else {
            self.disable_fields();
        }
    }

    fn enable_fields(&self) {
        let fields = lock(&self.fields).clone();
        for field in &fields {
            field.set_access_permitted(true);
        }
        self.execution.set_access_permitted(true);
    }

    fn disable_fields(&self) {
        let fields = lock(&self.fields).clone();
        for field in &fields {
            field.set_access_permitted(false);
        }
        self.execution.set_access_permitted(false);
        self.cache.drain_reclaimed();
    }

    fn is_direct_output(&self) -> bool {
        self.direct_output.load(Ordering::Acquire)
    }

    /// 直接输出模式下，路由可能悄悄改变了子节点，回调前重新拉取
    fn pull_used_nodes(&self) -> BindingResult<()> {
        let used = lock(&self.used_nodes).clone();
        for field in &used {
            field.update_field_and_children()?;
        }
        Ok(())
    }

    fn push_used_nodes(&self) -> BindingResult<()> {
        let used = lock(&self.used_nodes).clone();
        for field in &used {
            field.update_node_and_children()?;
        }
        Ok(())
    }
}

impl FieldAccessListener for ControllerShared {
    fn child_requires_access_state_change(&self, enable: bool) {
        if enable && self.is_direct_output() && *lock(&self.depth) == 0 {
            if let Err(err) = self.pull_used_nodes() {
                self.reporter().warning_report(
                    "Unable to refresh node fields before notification",
                    Some(&ScriptError::from(err)),
                );
            }
        }
        self.change_access(enable);
    }
}

/// 作用域内打开的脚本访问窗口
struct ScriptWindow<'a>(&'a ControllerShared);

impl<'a> ScriptWindow<'a> {
    fn open(shared: &'a ControllerShared) -> Self {
        shared.change_access(true);
        Self(shared)
    }
}

impl Drop for ScriptWindow<'_> {
    fn drop(&mut self) {
        self.0.change_access(false);
    }
}

/// 在访问窗口中执行一个用户回调，失败只报告；返回回调是否成功
fn invoke(
    shared: &ControllerShared,
    script: &mut dyn ScriptImplementation,
    context: &ScriptContext,
    callback: &str,
    f: impl FnOnce(&mut dyn ScriptImplementation, &ScriptContext) -> ScriptResult<()>,
) -> bool {
    let outcome = {
        let _window = ScriptWindow::open(shared);
        catch_unwind(AssertUnwindSafe(|| f(script, context)))
            .unwrap_or_else(|payload| Err(ScriptError::from_panic(payload)))
    };

    match outcome {
        Ok(()) => true,
        Err(err) => {
            let message = format!("Error in script {}", callback);
            shared.reporter().error_report(&message, Some(&err));
            false
        }
    }
}

// ============================================================================
// 控制器
// ============================================================================

/// 脚本调用控制器
pub struct ScriptInvocationController {
    shared: Arc<ControllerShared>,
    script: Box<dyn ScriptImplementation>,
    config: ScriptConfig,
    state: ControllerState,
    context: Option<ScriptContext>,
    fields: Vec<FieldWrapper>,
    updatable: Vec<FieldWrapper>,
    pending: BTreeSet<usize>,
    timestamp: f64,
    events_sent: bool,
}

impl ScriptInvocationController {
    pub fn new(
        script: Box<dyn ScriptImplementation>,
        execution: ExecutionContext,
        config: ScriptConfig,
    ) -> Self {
        let shared = Arc::new(ControllerShared {
            cache: execution.cache().clone(),
            execution,
            depth: Mutex::new(0),
            fields: Mutex::new(Vec::new()),
            used_nodes: Mutex::new(Vec::new()),
            direct_output: AtomicBool::new(false),
        });
        Self {
            shared,
            script,
            config,
            state: ControllerState::Uninitialized,
            context: None,
            fields: Vec::new(),
            updatable: Vec::new(),
            pending: BTreeSet::new(),
            timestamp: 0.0,
            events_sent: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn context(&self) -> Option<&ScriptContext> {
        self.context.as_ref()
    }

    pub fn is_direct_output(&self) -> bool {
        self.shared.is_direct_output()
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 由字段在处理节点通知时请求打开（或关闭）整个脚本的访问窗口
    pub fn child_requires_access_state_change(&self, enable: bool) {
        self.shared.child_requires_access_state_change(enable);
    }

    fn ensure_live(&self) -> BindingResult<()> {
        if self.state == ControllerState::ShutDown {
            return Err(BindingError::ControllerShutDown);
        }
        Ok(())
    }

    fn run_callback(
        &mut self,
        callback: &str,
        f: impl FnOnce(&mut dyn ScriptImplementation, &ScriptContext) -> ScriptResult<()>,
    ) -> bool {
        let Some(context) = self.context.clone() else {
            return false;
        };
        invoke(&self.shared, self.script.as_mut(), &context, callback, f)
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 绑定脚本节点并调用用户的 `initialize`
    ///
    /// 重复初始化只记录警告。
    pub fn initialize(&mut self, node: &NodeHandle) -> BindingResult<()> {
        self.ensure_live()?;
        if self.state != ControllerState::Uninitialized {
            tracing::warn!(
                target: "script",
                node = node.node_name(),
                "Script controller is already initialized"
            );
            return Ok(());
        }

        let cache = self.shared.cache.clone();
        let script_node = cache.node_wrapper(node);

        let mut by_name = BTreeMap::new();
        let mut fields = Vec::with_capacity(node.field_count());
        for index in 0..node.field_count() {
            let field = cache.field_wrapper_at(node, index, true)?;
            if self.config.is_read_only(field.name()) {
                field.mark_read_only();
            }
            by_name.insert(field.name().to_string(), field.clone());
            fields.push(field);
        }

        let direct_output = node
            .field_index(&self.config.direct_output_field)
            .filter(|&i| {
                node.field_declaration(i)
                    .map_or(false, |d| d.kind() == ValueKind::Boolean)
            })
            .map_or(false, |i| {
                matches!(node.field_value(i), Ok(FieldValue::Boolean(true)))
            });

        let updatable: Vec<FieldWrapper> = fields
            .iter()
            .filter(|f| f.access_kind() != AccessKind::InputOnly)
            .cloned()
            .collect();
        let used_nodes: Vec<FieldWrapper> = fields
            .iter()
            .filter(|f| {
                matches!(
                    f.access_kind(),
                    AccessKind::InitializeOnly | AccessKind::InputOutput
                ) && f.value_kind().is_node()
            })
            .cloned()
            .collect();

        for field in &fields {
            if matches!(
                field.access_kind(),
                AccessKind::InitializeOnly | AccessKind::InputOutput
            ) {
                field.update_field()?;
            }
        }

        *lock(&self.shared.fields) = fields.clone();
        *lock(&self.shared.used_nodes) = used_nodes;
        self.shared
            .direct_output
            .store(direct_output, Ordering::Release);
        let listener: Arc<dyn FieldAccessListener> = self.shared.clone();
        cache.set_access_listener(Arc::downgrade(&listener));

        self.context = Some(ScriptContext::new(
            script_node,
            by_name,
            self.shared.execution.clone(),
            direct_output,
        ));
        self.fields = fields;
        self.updatable = updatable;
        self.state = ControllerState::Idle;

        tracing::debug!(
            target: "script",
            node = node.node_name(),
            fields = self.fields.len(),
            direct_output,
            "Script controller initialized"
        );

        self.run_callback("initialize", |script, context| script.initialize(context));
        Ok(())
    }

    /// 设置本帧的事件时间戳
    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    /// 每帧事件分发前调用；只有声明为逐帧观察者的脚本会收到回调
    ///
    /// 返回是否调用了用户回调。
    pub fn prepare_events(&mut self) -> BindingResult<bool> {
        self.ensure_live()?;
        if self.state == ControllerState::Uninitialized || !self.script.is_per_frame_observer() {
            return Ok(false);
        }

        let direct_output = self.shared.is_direct_output();
        if direct_output {
            self.shared.pull_used_nodes()?;
        }
        self.run_callback("prepareEvents", |script, context| {
            script.prepare_events(context)
        });
        if direct_output {
            self.shared.push_used_nodes()?;
        }
        Ok(true)
    }

    /// 记录一个待分发的输入事件
    ///
    /// 初始化之前的事件被丢弃。同一字段多次入队只分发一次最新值。
    pub fn queue_event(&mut self, field_name: &str) -> BindingResult<()> {
        self.ensure_live()?;
        let Some(context) = &self.context else {
            tracing::trace!(target: "script", field = field_name, "Dropping event before initialize");
            return Ok(());
        };

        let field = context.field(field_name)?;
        if !field.access_kind().can_route_to() {
            return Err(BindingError::NotWritableViolation(field_name.to_string()));
        }

        self.pending.insert(field.index());
        self.state = ControllerState::EventsPending;
        Ok(())
    }

    /// 分发所有待处理事件，按字段声明顺序
    ///
    /// 返回是否分发了事件。
    pub fn send_events(&mut self) -> BindingResult<bool> {
        self.ensure_live()?;
        if self.pending.is_empty() {
            return Ok(false);
        }

        if self.shared.is_direct_output() {
            self.shared.pull_used_nodes()?;
        }

        let pending = std::mem::take(&mut self.pending);
        {
            let _window = ScriptWindow::open(&self.shared);
            for index in pending {
                let Some(field) = self.fields.get(index) else {
                    continue;
                };
                if let Err(err) = field.update_field() {
                    let message = format!("Unable to read event value for `{}`", field.name());
                    self.shared
                        .reporter()
                        .warning_report(&message, Some(&ScriptError::from(err)));
                }
                field.fire_notification(self.timestamp);
            }
        }

        self.events_sent = true;
        self.state = ControllerState::Idle;
        Ok(true)
    }

    /// 把脚本写入的输出字段推回节点
    ///
    /// 单个字段写回失败会被报告，其余字段照常写回。
    pub fn update_event_outs(&mut self) -> BindingResult<()> {
        self.ensure_live()?;
        if self.state == ControllerState::Uninitialized {
            return Ok(());
        }

        let direct_output = self.shared.is_direct_output();
        for field in &self.updatable {
            let pushed = if direct_output && field.value_kind().is_node() {
                field.update_node_and_children()
            } else if field.has_changed() {
                field.update_node()
            } else {
                Ok(())
            };
            if let Err(err) = pushed {
                let message = format!("Unable to write event out `{}`", field.name());
                self.shared
                    .reporter()
                    .warning_report(&message, Some(&ScriptError::from(err)));
            }
        }

        if let Err(err) = self.shared.execution.update_event_outs() {
            self.shared.reporter().warning_report(
                "Unable to write back script-created nodes",
                Some(&ScriptError::from(err)),
            );
        }
        Ok(())
    }

    /// 本步分发过事件时调用用户的 `eventsProcessed`
    ///
    /// 返回是否调用了用户回调。
    pub fn events_processed(&mut self) -> BindingResult<bool> {
        self.ensure_live()?;
        if !self.events_sent {
            return Ok(false);
        }
        self.events_sent = false;
        self.run_callback("eventsProcessed", |script, context| {
            script.events_processed(context)
        });
        Ok(true)
    }

    /// 调用用户的 `shutdown`；之后所有操作都返回 `ControllerShutDown`
    pub fn shutdown(&mut self) -> BindingResult<()> {
        self.ensure_live()?;
        if self.state != ControllerState::Uninitialized {
            self.run_callback("shutdown", |script, context| script.shutdown(context));
        }

        self.state = ControllerState::ShutDown;
        self.pending.clear();
        self.context = None;
        self.fields.clear();
        self.updatable.clear();
        lock(&self.shared.fields).clear();
        lock(&self.shared.used_nodes).clear();
        self.shared.cache.drain_reclaimed();
        tracing::debug!(target: "script", "Script controller shut down");
        Ok(())
    }
}
