//! 字段事件多播器
//!
//! 不可变的监听器链表。添加或移除都会返回新链表，正在分发的旧链表不受影响，
//! 因此监听器可以在回调中安全地修改自己所在字段的监听器集合。

use super::event::FieldEvent;
use crate::core::error::{ScriptError, ScriptResult};
use crate::core::reporting::ErrorReporter;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// 可读字段变更监听器
pub trait FieldEventListener: Send + Sync {
    fn readable_field_changed(&self, event: &FieldEvent) -> ScriptResult<()>;
}

impl<F> FieldEventListener for F
where
    F: Fn(&FieldEvent) -> ScriptResult<()> + Send + Sync,
{
    fn readable_field_changed(&self, event: &FieldEvent) -> ScriptResult<()> {
        self(event)
    }
}

struct Link {
    listener: Arc<dyn FieldEventListener>,
    next: Option<Arc<Link>>,
}

fn same_listener(a: &Arc<dyn FieldEventListener>, b: &Arc<dyn FieldEventListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// 监听器链
///
/// 链表头是最后注册的监听器；分发按注册顺序进行。
#[derive(Clone, Default)]
pub struct EventMulticaster {
    head: Option<Arc<Link>>,
    len: usize,
}

impl EventMulticaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// 追加监听器，返回新链
    pub fn add(&self, listener: Arc<dyn FieldEventListener>) -> Self {
        Self {
            head: Some(Arc::new(Link {
                listener,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// 移除最近一次注册的同一监听器，返回新链
    ///
    /// 监听器不在链中时返回原链的拷贝。
    pub fn remove(&self, listener: &Arc<dyn FieldEventListener>) -> Self {
        let mut newest_first = Vec::with_capacity(self.len);
        let mut removed = false;
        let mut cursor = self.head.as_ref();
        while let Some(link) = cursor {
            if !removed && same_listener(&link.listener, listener) {
                removed = true;
            } else {
                newest_first.push(Arc::clone(&link.listener));
            }
            cursor = link.next.as_ref();
        }

        if !removed {
            return self.clone();
        }

        newest_first
            .into_iter()
            .rev()
            .fold(Self::new(), |chain, l| chain.add(l))
    }

    /// 按注册顺序列出监听器
    pub fn listeners(&self) -> Vec<Arc<dyn FieldEventListener>> {
        let mut listeners = Vec::with_capacity(self.len);
        let mut cursor = self.head.as_ref();
        while let Some(link) = cursor {
            listeners.push(Arc::clone(&link.listener));
            cursor = link.next.as_ref();
        }
        listeners.reverse();
        listeners
    }

    /// 向链上每个监听器分发事件
    ///
    /// 监听器返回错误或 panic 时逐条报告，然后继续分发给剩余监听器。
    /// 返回失败的监听器数量。
    pub fn dispatch(&self, event: &FieldEvent, reporter: &dyn ErrorReporter) -> usize {
        let mut failures = 0;
        for listener in self.listeners() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.readable_field_changed(event)
            }))
            .unwrap_or_else(|payload| Err(ScriptError::from_panic(payload)));

            if let Err(err) = outcome {
                failures += 1;
                reporter.error_report("Error sending field event to listener", Some(&err));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorAggregator;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn FieldEventListener> {
        let log = Arc::clone(log);
        Arc::new(move |_: &FieldEvent| -> ScriptResult<()> {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = EventMulticaster::new()
            .add(recorder(&log, "first"))
            .add(recorder(&log, "second"))
            .add(recorder(&log, "third"));
        assert_eq!(chain.len(), 3);

        let reporter = ErrorAggregator::new();
        assert_eq!(chain.dispatch(&FieldEvent::default(), &reporter), 0);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_keeps_order_and_old_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middle = recorder(&log, "middle");
        let chain = EventMulticaster::new()
            .add(recorder(&log, "a"))
            .add(Arc::clone(&middle))
            .add(recorder(&log, "b"));

        let shorter = chain.remove(&middle);
        assert_eq!(shorter.len(), 2);
        assert_eq!(chain.len(), 3);

        let reporter = ErrorAggregator::new();
        shorter.dispatch(&FieldEvent::default(), &reporter);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);

        let unchanged = shorter.remove(&middle);
        assert_eq!(unchanged.len(), 2);
        assert!(EventMulticaster::new().remove(&middle).is_empty());
    }

    #[test]
    fn test_failures_do_not_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Arc<dyn FieldEventListener> =
            Arc::new(|_: &FieldEvent| -> ScriptResult<()> { Err(ScriptError::runtime("bad listener")) });
        let panicking: Arc<dyn FieldEventListener> =
            Arc::new(|_: &FieldEvent| -> ScriptResult<()> { panic!("listener exploded") });

        let chain = EventMulticaster::new()
            .add(failing)
            .add(panicking)
            .add(recorder(&log, "survivor"));

        let reporter = ErrorAggregator::new();
        assert_eq!(chain.dispatch(&FieldEvent::default(), &reporter), 2);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);

        let stats = reporter.get_stats();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.by_type.get("Runtime"), Some(&1));
        assert_eq!(stats.by_type.get("Panicked"), Some(&1));
    }
}
