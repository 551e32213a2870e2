//! 绑定层
//!
//! - `access` - 字段访问门控规则
//! - `value` - 本地值缓冲区与节点同步
//! - `field` - 字段包装器
//! - `node` - 节点包装器
//! - `cache` - 包装器缓存与回收队列
//! - `factory` - 节点类型特化注册表
//! - `event` - 字段事件与事件池
//! - `multicaster` - 监听器链
//! - `route` - 路由值对象
//! - `context` - 脚本执行上下文

pub mod access;
pub mod cache;
pub mod context;
pub mod event;
pub mod factory;
pub mod field;
pub mod multicaster;
pub mod node;
pub mod route;
pub mod value;

pub use access::{check_access, is_readable, is_writable, AccessCheck};
pub use cache::WrapperCache;
pub use context::ExecutionContext;
pub use event::{EventPool, FieldEvent};
pub use factory::{NodeSpecialization, NodeWrapperFactory, SpecializationError, SpecializationFn};
pub use field::{FieldAccessListener, FieldWrapper};
pub use multicaster::{EventMulticaster, FieldEventListener};
pub use node::{NodeWrapper, WeakNodeWrapper};
pub use route::Route;
pub use value::{ArrayBuffer, ScriptValue};
