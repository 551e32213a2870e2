//! 路由值对象

use super::node::NodeWrapper;
use std::hash::{Hash, Hasher};

/// 两个字段之间的逻辑连接
///
/// 按端点相等比较，与引擎内部的路由标识无关。
#[derive(Debug, Clone)]
pub struct Route {
    source: NodeWrapper,
    source_field: String,
    destination: NodeWrapper,
    destination_field: String,
}

impl Route {
    pub fn new(
        source: NodeWrapper,
        source_field: impl Into<String>,
        destination: NodeWrapper,
        destination_field: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_field: source_field.into(),
            destination,
            destination_field: destination_field.into(),
        }
    }

    pub fn source(&self) -> &NodeWrapper {
        &self.source
    }

    pub fn source_field(&self) -> &str {
        &self.source_field
    }

    pub fn destination(&self) -> &NodeWrapper {
        &self.destination
    }

    pub fn destination_field(&self) -> &str {
        &self.destination_field
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.source_field == other.source_field
            && self.destination == other.destination
            && self.destination_field == other.destination_field
    }
}

impl Eq for Route {}

impl Hash for Route {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.key().hash(state);
        self.source_field.hash(state);
        self.destination.key().hash(state);
        self.destination_field.hash(state);
    }
}
