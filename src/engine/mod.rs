//! 场景图引擎协作方
//!
//! - `field` - 字段声明与字段值
//! - `node` - 节点接口与共享句柄
//! - `scene` - 场景空间与路由管理接口
//! - `memory` - 内存参考实现

pub mod field;
pub mod memory;
pub mod node;
pub mod scene;

pub use field::{AccessKind, FieldDeclaration, FieldValue, PixelBuffer, ValueKind};
pub use memory::{MemoryNode, MemoryRouteManager, MemoryScene};
pub use node::{Node, NodeHandle, NodeKey, NodeListener, UserData};
pub use scene::{EngineRoute, RouteManager, SceneSpace};
