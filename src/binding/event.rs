//! 字段事件与事件对象池

use super::field::FieldWrapper;
use crate::config::EventPoolConfig;
use crate::core::utils::lock;
use crate::engine::UserData;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// 字段变更事件
///
/// 携带事件源、时间戳以及字段上附加的用户数据。
#[derive(Clone, Default)]
pub struct FieldEvent {
    source: Option<FieldWrapper>,
    timestamp: f64,
    user_data: Option<UserData>,
}

impl FieldEvent {
    pub fn new(source: FieldWrapper, timestamp: f64, user_data: Option<UserData>) -> Self {
        Self {
            source: Some(source),
            timestamp,
            user_data,
        }
    }

    /// 事件源字段
    pub fn source(&self) -> Option<&FieldWrapper> {
        self.source.as_ref()
    }

    /// 事件时间戳（秒）
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// 释放对事件源与用户数据的引用
    fn reset(&mut self) {
        self.source = None;
        self.timestamp = 0.0;
        self.user_data = None;
    }
}

impl fmt::Debug for FieldEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldEvent")
            .field("source", &self.source.as_ref().map(FieldWrapper::name))
            .field("timestamp", &self.timestamp)
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}

/// 事件对象池 - 减少每次分发的分配
///
/// 归还的事件会先清空引用，池中的事件不会延长任何包装器的生命周期。
pub struct EventPool {
    available: Mutex<VecDeque<FieldEvent>>,
    max_size: usize,
}

impl EventPool {
    /// 创建事件池
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        let initial = initial_size.min(max_size);
        let mut available = VecDeque::with_capacity(initial);
        for _ in 0..initial {
            available.push_back(FieldEvent::default());
        }

        Self {
            available: Mutex::new(available),
            max_size,
        }
    }

    pub fn from_config(config: &EventPoolConfig) -> Self {
        Self::new(config.initial_size, config.max_size)
    }

    /// 从池中获取事件并填充
    pub fn acquire(
        &self,
        source: FieldWrapper,
        timestamp: f64,
        user_data: Option<UserData>,
    ) -> FieldEvent {
        let mut event = lock(&self.available).pop_front().unwrap_or_default();
        event.source = Some(source);
        event.timestamp = timestamp;
        event.user_data = user_data;
        event
    }

    /// 将事件归还到池中
    pub fn release(&self, mut event: FieldEvent) {
        event.reset();
        let mut available = lock(&self.available);
        if available.len() < self.max_size {
            available.push_back(event);
        }
    }

    /// 获取池中可用事件的数量
    pub fn available_count(&self) -> usize {
        lock(&self.available).len()
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::from_config(&EventPoolConfig::default())
    }
}
