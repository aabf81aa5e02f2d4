//! 编译结果缓存：迁移的守卫与策略对象按迁移 id 缓存，弧阈值按弧 id 缓存。
//! 仅在收到 `Modified` / `Deleted` 事件时失效。
use indexmap::IndexMap;

use crate::engine::behavior::{TransitionBehavior, behavior_for};
use crate::expr::{CompiledExpr, ExpressionError};
use crate::net::{ArcId, ElementRef, Net, TransitionId};
use crate::notify::ModelEvent;

#[derive(Debug)]
pub struct CompiledTransition {
    pub guard: Result<Option<CompiledExpr>, ExpressionError>,
    pub behavior: Result<Box<dyn TransitionBehavior>, ExpressionError>,
}

#[derive(Debug, Default)]
pub struct BehaviorCache {
    transitions: IndexMap<TransitionId, CompiledTransition>,
    thresholds: IndexMap<ArcId, Result<CompiledExpr, ExpressionError>>,
}

impl BehaviorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `net` 中仍存在的元素补齐尚未编译的表达式。
    pub fn prepare(&mut self, net: &Net) {
        for (id, transition) in net.transitions() {
            self.transitions.entry(id).or_insert_with(|| {
                log::trace!("compiling {} `{}`", id, transition.name);
                CompiledTransition {
                    guard: transition
                        .guard
                        .as_deref()
                        .map(CompiledExpr::compile)
                        .transpose(),
                    behavior: behavior_for(&transition.transition_type),
                }
            });
        }
        for (id, arc) in net.arcs() {
            if let Some(threshold) = arc.threshold.as_deref() {
                self.thresholds
                    .entry(id)
                    .or_insert_with(|| CompiledExpr::compile(threshold));
            }
        }
    }

    pub fn transition(&self, id: TransitionId) -> Option<&CompiledTransition> {
        self.transitions.get(&id)
    }

    pub fn threshold(&self, id: ArcId) -> Option<&Result<CompiledExpr, ExpressionError>> {
        self.thresholds.get(&id)
    }

    pub fn observe(&mut self, event: &ModelEvent) {
        if let ModelEvent::Modified(element) | ModelEvent::Deleted(element) = event {
            self.invalidate(*element);
        }
    }

    fn invalidate(&mut self, element: ElementRef) {
        match element {
            ElementRef::Transition(id) => {
                self.transitions.shift_remove(&id);
            }
            ElementRef::Arc(id) => {
                self.thresholds.shift_remove(&id);
            }
            ElementRef::Place(_) => {}
        }
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
        self.thresholds.clear();
    }

    pub fn len(&self) -> usize {
        self.transitions.len() + self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
