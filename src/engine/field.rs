//! 字段声明与字段值
//!
//! 引擎侧的字段描述。值类型只约定同步契约，具体编解码属于引擎本身。

use super::node::NodeHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 字段访问类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// 仅输入（eventIn）
    InputOnly,
    /// 仅输出（eventOut）
    OutputOnly,
    /// 输入输出（exposedField）
    InputOutput,
    /// 仅初始化（field）
    InitializeOnly,
}

impl AccessKind {
    /// 所有访问类型
    pub const ALL: [AccessKind; 4] = [
        AccessKind::InputOnly,
        AccessKind::OutputOnly,
        AccessKind::InputOutput,
        AccessKind::InitializeOnly,
    ];

    /// 是否可以作为路由源端
    pub fn can_route_from(self) -> bool {
        matches!(self, AccessKind::OutputOnly | AccessKind::InputOutput)
    }

    /// 是否可以作为路由目标端
    pub fn can_route_to(self) -> bool {
        matches!(self, AccessKind::InputOnly | AccessKind::InputOutput)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessKind::InputOnly => "inputOnly",
            AccessKind::OutputOnly => "outputOnly",
            AccessKind::InputOutput => "inputOutput",
            AccessKind::InitializeOnly => "initializeOnly",
        };
        f.write_str(name)
    }
}

/// 字段值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Boolean,
    Scalar,
    ScalarArray,
    String,
    StringArray,
    Node,
    NodeArray,
    Image,
}

impl ValueKind {
    /// 是否为节点引用类型（单个或数组）
    pub fn is_node(self) -> bool {
        matches!(self, ValueKind::Node | ValueKind::NodeArray)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Scalar => "scalar",
            ValueKind::ScalarArray => "scalar array",
            ValueKind::String => "string",
            ValueKind::StringArray => "string array",
            ValueKind::Node => "node",
            ValueKind::NodeArray => "node array",
            ValueKind::Image => "image",
        };
        f.write_str(name)
    }
}

/// 字段声明：(名称, 访问类型, 值类型)，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDeclaration {
    name: String,
    access: AccessKind,
    kind: ValueKind,
}

impl FieldDeclaration {
    pub fn new(name: impl Into<String>, access: AccessKind, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            access,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> AccessKind {
        self.access
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// 不透明的像素缓冲区
///
/// 每个像素打包为一个 `u32`，`components` 表示每像素的通道数（1-4）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub pixels: Vec<u32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, components: u8, pixels: Vec<u32>) -> Self {
        Self {
            width,
            height,
            components,
            pixels,
        }
    }

    /// 像素数据长度是否与尺寸一致
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == (self.width as usize) * (self.height as usize)
    }
}

/// 引擎侧的字段值
///
/// 节点引用以 [`NodeHandle`] 表示，只在引擎与绑定层之间流动，不会交给脚本。
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Scalar(f64),
    ScalarArray(Vec<f64>),
    String(String),
    StringArray(Vec<String>),
    Node(Option<NodeHandle>),
    NodeArray(Vec<Option<NodeHandle>>),
    Image(PixelBuffer),
}

impl FieldValue {
    /// 值类型
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Boolean(_) => ValueKind::Boolean,
            FieldValue::Scalar(_) => ValueKind::Scalar,
            FieldValue::ScalarArray(_) => ValueKind::ScalarArray,
            FieldValue::String(_) => ValueKind::String,
            FieldValue::StringArray(_) => ValueKind::StringArray,
            FieldValue::Node(_) => ValueKind::Node,
            FieldValue::NodeArray(_) => ValueKind::NodeArray,
            FieldValue::Image(_) => ValueKind::Image,
        }
    }

    /// 某个值类型的默认值
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => FieldValue::Boolean(false),
            ValueKind::Scalar => FieldValue::Scalar(0.0),
            ValueKind::ScalarArray => FieldValue::ScalarArray(Vec::new()),
            ValueKind::String => FieldValue::String(String::new()),
            ValueKind::StringArray => FieldValue::StringArray(Vec::new()),
            ValueKind::Node => FieldValue::Node(None),
            ValueKind::NodeArray => FieldValue::NodeArray(Vec::new()),
            ValueKind::Image => FieldValue::Image(PixelBuffer::default()),
        }
    }
}
