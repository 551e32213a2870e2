//! 脚本层
//!
//! - `script` - 用户脚本接口与回调上下文
//! - `controller` - 脚本生命周期与事件分发

pub mod controller;
pub mod script;

pub use controller::{ControllerState, ScriptInvocationController};
pub use script::{ScriptContext, ScriptImplementation};
