//! 变更通知：模型元素的增删改与每个仿真步的结果，按订阅顺序同步分发给观察者。
//!
//! 通知器由 [`crate::engine::Simulation`] 持有，不存在全局广播器。
use std::fmt;

use indexmap::IndexMap;
use log::Level;

use crate::net::{ElementRef, Marking, TransitionId};

/// 每次提交一步后发布的快照。
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub step: u64,
    pub time: f64,
    pub fired: Vec<TransitionId>,
    pub marking: Marking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Created(ElementRef),
    Modified(ElementRef),
    Deleted(ElementRef),
    Stepped(StepSummary),
}

impl ModelEvent {
    pub fn element(&self) -> Option<ElementRef> {
        match self {
            ModelEvent::Created(e) | ModelEvent::Modified(e) | ModelEvent::Deleted(e) => Some(*e),
            ModelEvent::Stepped(_) => None,
        }
    }
}

pub trait Observer {
    fn notify(&mut self, event: &ModelEvent);
}

impl<F> Observer for F
where
    F: FnMut(&ModelEvent),
{
    fn notify(&mut self, event: &ModelEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ChangeNotifier {
    next_id: u64,
    observers: IndexMap<SubscriptionId, Box<dyn Observer + Send>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<O>(&mut self, observer: O) -> SubscriptionId
    where
        O: Observer + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.insert(id, Box::new(observer));
        id
    }

    /// id 从未分配或已被移除时返回 `false`。
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.shift_remove(&id).is_some()
    }

    pub fn publish(&mut self, event: &ModelEvent) {
        for observer in self.observers.values_mut() {
            observer.notify(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscriptions", &self.observers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 将所有事件转发给 `log` 门面。
#[derive(Debug, Clone, Copy)]
pub struct LogObserver {
    pub level: Level,
}

impl Default for LogObserver {
    fn default() -> Self {
        Self {
            level: Level::Debug,
        }
    }
}

impl Observer for LogObserver {
    fn notify(&mut self, event: &ModelEvent) {
        match event {
            ModelEvent::Created(element) => log::log!(self.level, "created {}", element),
            ModelEvent::Modified(element) => log::log!(self.level, "modified {}", element),
            ModelEvent::Deleted(element) => log::log!(self.level, "deleted {}", element),
            ModelEvent::Stepped(summary) => log::log!(
                self.level,
                "step {} at t={:.6}: fired {:?}",
                summary.step,
                summary.time,
                summary.fired
            ),
        }
    }
}
