//! # Scene Binding
//!
//! A scripting access layer between a scene-graph engine and script code.
//!
//! ## Features
//!
//! - **Access gating**: every field read and write is checked against the field's
//!   access kind, the caller's perspective and the script callback window
//! - **Wrapper caching**: at most one live wrapper per node and per field, with dirty
//!   values flushed back to the engine before a reclaimed wrapper is discarded
//! - **Event delivery**: immutable listener chains that report each failing listener
//!   and keep dispatching to the rest
//! - **Script lifecycle**: a controller that drives `initialize`, batched event delivery,
//!   output propagation and `shutdown`
//!
//! ## Architecture Design
//!
//! The engine is consumed through the traits in [`engine`]; the crate never owns
//! engine nodes. Script code only sees [`binding::NodeWrapper`] and
//! [`binding::FieldWrapper`] handles.
//!
//! ### Example
//!
//! ```rust
//! use scene_binding::binding::WrapperCache;
//! use scene_binding::engine::{AccessKind, FieldDeclaration, FieldValue, MemoryNode, ValueKind};
//!
//! let node = MemoryNode::shared(
//!     "Transform",
//!     vec![FieldDeclaration::new("scale", AccessKind::InputOutput, ValueKind::Scalar)],
//! );
//! let cache = WrapperCache::default();
//! let wrapper = cache.node_wrapper(&node.handle());
//! wrapper.set_access_permitted(true);
//!
//! let scale = wrapper.get_field("scale").unwrap();
//! scale.set_scalar(2.0).unwrap();
//! wrapper.update_node_and_children().unwrap();
//! assert_eq!(node.value_of("scale"), Some(FieldValue::Scalar(2.0)));
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Errors, error reporting, logging
//! - [`config`]: Configuration loading
//! - [`engine`]: Engine collaborator traits and an in-memory engine
//! - [`binding`]: Field and node wrappers, cache, listeners
//! - [`scripting`]: Script interface and invocation controller

/// Errors, error reporting and logging
pub mod core;
/// Configuration system
pub mod config;
/// Engine collaborator interfaces
pub mod engine;
/// Field and node wrappers exposed to scripts
pub mod binding;
/// Script lifecycle control
pub mod scripting;

pub use binding::{
    ExecutionContext, FieldEvent, FieldEventListener, FieldWrapper, NodeWrapper, NodeWrapperFactory,
    Route, ScriptValue, WrapperCache,
};
pub use config::BindingConfig;
pub use core::{BindingError, BindingResult, ErrorReporter, ScriptError, ScriptResult};
pub use scripting::{ScriptContext, ScriptImplementation, ScriptInvocationController};
