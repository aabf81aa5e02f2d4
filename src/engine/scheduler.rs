//! # 步进调度
//!
//! 每一步按固定顺序执行：
//! 1. 检查取消标志与运行上限；
//! 2. 推进时间 `t = step × dt`（乘积而非累加，避免漂移）；
//! 3. 基于步前快照刷新可激发记录；
//! 4. 收集就绪的离散迁移，冲突消解后对快照原子提交；
//! 5. 以同一快照计算连续流，按离散提交后的余量缩放并应用；
//! 6. 本步无发射、无流动且无等待中的迁移时进入 `Deadlocked`。
//!
//! `step()` 从不返回错误：表达式故障、冲突与容量拒绝都记录在 [`StepOutcome`] 中。
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::config::SimulationConfig;
use crate::engine::TIME_EPSILON;
use crate::engine::behavior::Readiness;
use crate::engine::cache::BehaviorCache;
use crate::engine::conflict::{self, Candidate, ConflictPolicy, Denial};
use crate::engine::enablement::{EnablementRecord, EnablementTracker};
use crate::engine::flow::{self, ContinuousFlow, FlowDemand};
use crate::engine::scope::Scope;
use crate::expr::{CompiledExpr, ExpressionError};
use crate::net::{
    Arc, ArcId, ArcKind, ElementRef, Marking, ModelInconsistencyError, Net, Place, PlaceId, Tokens,
    Transition, TransitionId,
};
use crate::notify::{ChangeNotifier, ModelEvent, Observer, StepSummary, SubscriptionId};

/// 低于此值的流量在死锁检测中不算作活动。
const NEGLIGIBLE_FLOW: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    #[default]
    Running,
    Deadlocked,
    Cancelled,
    Finished,
}

impl SimulationStatus {
    pub fn is_terminal(self) -> bool {
        self != SimulationStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepWarning {
    /// 就绪变迁在冲突中落选，保持使能。
    ConflictResolution {
        transition: TransitionId,
        place: PlaceId,
        needed: Tokens,
        available: Tokens,
    },
    CapacityExceeded {
        transition: TransitionId,
        place: PlaceId,
        capacity: Tokens,
        attempted: Tokens,
    },
    LateFiring {
        transition: TransitionId,
        lateness: f64,
    },
    NegativeRate {
        transition: TransitionId,
        rate: f64,
    },
}

impl fmt::Display for StepWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepWarning::ConflictResolution {
                transition,
                place,
                needed,
                available,
            } => write!(
                f,
                "{} denied: needs {} from {} but only {} is left",
                transition, needed, place, available
            ),
            StepWarning::CapacityExceeded {
                transition,
                place,
                capacity,
                attempted,
            } => write!(
                f,
                "{} limited by capacity {} of {} (would reach {})",
                transition, capacity, place, attempted
            ),
            StepWarning::LateFiring {
                transition,
                lateness,
            } => write!(f, "{} fired {} past its latest bound", transition, lateness),
            StepWarning::NegativeRate { transition, rate } => {
                write!(f, "{} rate {} clamped to 0", transition, rate)
            }
        }
    }
}

/// 仅影响单个变迁、单个步的表达式错误。
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{transition} ({element}): {error}")]
pub struct TransitionFault {
    pub transition: TransitionId,
    pub element: ElementRef,
    #[source]
    pub error: ExpressionError,
}

/// 终止状态：没有变迁能再发生或流动。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadlockSignal {
    pub step: u64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    pub step: u64,
    pub time: f64,
    pub fired: Vec<TransitionId>,
    pub flows: Vec<ContinuousFlow>,
    pub warnings: Vec<StepWarning>,
    pub faults: Vec<TransitionFault>,
    pub deadlock: Option<DeadlockSignal>,
    pub status: SimulationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringEvent {
    pub step: u64,
    pub time: f64,
    pub transition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub seed: u64,
    pub steps: u64,
    pub final_time: f64,
    pub status: SimulationStatus,
    pub final_marking: IndexMap<String, Tokens>,
    pub firing_counts: IndexMap<String, u64>,
    pub trace: Vec<FiringEvent>,
    pub fault_count: usize,
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Model(#[from] ModelInconsistencyError),
    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),
}

/// 协作式取消标志，在每步边界检查。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 使能变迁在某一标识下解析出的托肯增减。
struct ResolvedArcs {
    consume: SmallVec<[(PlaceId, Tokens); 4]>,
    produce: SmallVec<[(PlaceId, Tokens); 4]>,
}

pub struct Simulation {
    net: Net,
    config: SimulationConfig,
    policy: ConflictPolicy,
    marking: Marking,
    time: f64,
    step: u64,
    status: SimulationStatus,
    tracker: EnablementTracker,
    cache: BehaviorCache,
    rng: StdRng,
    notifier: ChangeNotifier,
    cancel: CancelToken,
    firing_counts: IndexMap<TransitionId, u64>,
    trace: Vec<FiringEvent>,
    fault_count: usize,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("step", &self.step)
            .field("time", &self.time)
            .field("status", &self.status)
            .field("policy", &self.policy)
            .field("marking", &self.marking)
            .finish()
    }
}

impl Simulation {
    pub fn new(net: Net, config: SimulationConfig) -> Result<Self, SimulationError> {
        net.validate()?;
        if !(config.dt.is_finite() && config.dt > 0.0) {
            return Err(SimulationError::InvalidTimeStep(config.dt));
        }
        let mut simulation = Self {
            marking: net.initial_marking(),
            policy: config.conflict_policy.into(),
            rng: StdRng::seed_from_u64(config.seed),
            net,
            config,
            time: 0.0,
            step: 0,
            status: SimulationStatus::Running,
            tracker: EnablementTracker::new(),
            cache: BehaviorCache::new(),
            notifier: ChangeNotifier::new(),
            cancel: CancelToken::new(),
            firing_counts: IndexMap::new(),
            trace: Vec::new(),
            fault_count: 0,
        };
        simulation.prime();
        Ok(simulation)
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: ConflictPolicy) {
        self.policy = policy;
    }

    /// 回到 t = 0，恢复初始标识并重新播种随机数生成器；网结构保持不变。
    pub fn reset(&mut self) {
        self.time = 0.0;
        self.step = 0;
        self.status = SimulationStatus::Running;
        self.marking = self.net.initial_marking();
        self.tracker.reset();
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.firing_counts.clear();
        self.trace.clear();
        self.fault_count = 0;
        self.prime();
    }

    fn prime(&mut self) {
        self.cache.prepare(&self.net);
        let snapshot = self.marking.clone();
        let (_, faults) = refresh(
            &self.net,
            &self.cache,
            &mut self.tracker,
            &mut self.rng,
            &snapshot,
            self.time,
        );
        for fault in faults {
            log::warn!("t={}: {}", self.time, fault);
        }
    }

    fn next_time(&self) -> f64 {
        (self.step + 1) as f64 * self.config.dt
    }

    fn limit_reached(&self) -> bool {
        self.config.max_steps.is_some_and(|max| self.step >= max)
            || self
                .config
                .end_time
                .is_some_and(|end| self.next_time() > end + TIME_EPSILON)
    }

    fn idle_outcome(&self) -> StepOutcome {
        StepOutcome {
            step: self.step,
            time: self.time,
            status: self.status,
            ..StepOutcome::default()
        }
    }

    pub fn step(&mut self) -> StepOutcome {
        if self.status.is_terminal() {
            return self.idle_outcome();
        }
        if self.cancel.is_cancelled() {
            log::info!("simulation cancelled at step {}", self.step);
            self.status = SimulationStatus::Cancelled;
            return self.idle_outcome();
        }
        if self.limit_reached() {
            self.status = SimulationStatus::Finished;
            return self.idle_outcome();
        }

        let step = self.step + 1;
        let now = step as f64 * self.config.dt;
        let snapshot = self.marking.clone();
        self.cache.prepare(&self.net);
        let (resolved, faults) = refresh(
            &self.net,
            &self.cache,
            &mut self.tracker,
            &mut self.rng,
            &snapshot,
            now,
        );
        let mut outcome = StepOutcome {
            step,
            time: now,
            faults,
            ..StepOutcome::default()
        };

        let mut candidates = Vec::new();
        let mut demands = Vec::new();
        let mut waiting = false;
        for (id, arcs) in resolved {
            let (Some(record), Some(compiled), Some(transition)) = (
                self.tracker.record(id),
                self.cache.transition(id),
                self.net.transition(id),
            ) else {
                continue;
            };
            let Ok(behavior) = &compiled.behavior else {
                continue;
            };
            match behavior.readiness(record, now) {
                Readiness::Blocked => {}
                Readiness::Waiting { .. } => waiting = true,
                Readiness::Ready { late } => {
                    if let Some(lateness) = late {
                        outcome.warnings.push(StepWarning::LateFiring {
                            transition: id,
                            lateness,
                        });
                    }
                    candidates.push(Candidate {
                        transition: id,
                        consume: arcs.consume,
                        produce: arcs.produce,
                    });
                }
                Readiness::Flowing => {
                    let scope = Scope::new(&self.net, &snapshot, now, transition.parameters());
                    match behavior.flow_rate(&scope) {
                        Ok(Some(rate)) => {
                            if let Some(raw) = rate.negative {
                                outcome.warnings.push(StepWarning::NegativeRate {
                                    transition: id,
                                    rate: raw,
                                });
                            }
                            demands.push(FlowDemand {
                                transition: id,
                                rate: rate.rate,
                                inputs: arcs.consume,
                                outputs: arcs.produce,
                            });
                        }
                        Ok(None) => {}
                        Err(error) => outcome.faults.push(TransitionFault {
                            transition: id,
                            element: ElementRef::Transition(id),
                            error,
                        }),
                    }
                }
            }
        }

        let resolution = conflict::resolve(&self.net, &self.policy, &snapshot, candidates);
        for candidate in resolution.admitted {
            self.commit(&candidate, step, now);
            outcome.fired.push(candidate.transition);
        }
        for (candidate, denial) in resolution.denied {
            outcome.warnings.push(match denial {
                Denial::Conflict {
                    place,
                    needed,
                    available,
                } => StepWarning::ConflictResolution {
                    transition: candidate.transition,
                    place,
                    needed,
                    available,
                },
                Denial::Capacity {
                    place,
                    after,
                    capacity,
                } => StepWarning::CapacityExceeded {
                    transition: candidate.transition,
                    place,
                    capacity,
                    attempted: after,
                },
            });
        }

        let integrated = flow::integrate(&self.net, &mut self.marking, &demands, self.config.dt);
        for cap in integrated.capped {
            outcome.warnings.push(StepWarning::CapacityExceeded {
                transition: cap.transition,
                place: cap.place,
                capacity: cap.capacity,
                attempted: cap.attempted,
            });
        }
        outcome.flows = integrated.flows;

        // Re-observe at the commit instant so re-enabled transitions start their cycle now.
        let settled = self.marking.clone();
        refresh(
            &self.net,
            &self.cache,
            &mut self.tracker,
            &mut self.rng,
            &settled,
            now,
        );

        self.step = step;
        self.time = now;
        self.fault_count += outcome.faults.len();
        for warning in &outcome.warnings {
            log::warn!("step {}: {}", step, warning);
        }
        for fault in &outcome.faults {
            log::warn!("step {}: {}", step, fault);
        }

        let flowed = outcome
            .flows
            .iter()
            .any(|flow| flow.amount > NEGLIGIBLE_FLOW);
        if outcome.fired.is_empty() && !flowed && !waiting {
            log::info!("deadlock at step {} (t={})", step, now);
            self.status = SimulationStatus::Deadlocked;
            outcome.deadlock = Some(DeadlockSignal { step, time: now });
        }
        outcome.status = self.status;

        if !self.notifier.is_empty() {
            self.notifier.publish(&ModelEvent::Stepped(StepSummary {
                step,
                time: now,
                fired: outcome.fired.clone(),
                marking: self.marking.clone(),
            }));
        }
        outcome
    }

    fn commit(&mut self, candidate: &Candidate, step: u64, now: f64) {
        for &(place, weight) in &candidate.consume {
            let tokens = self.marking.tokens_mut(place);
            *tokens = (*tokens - weight).max(0.0);
        }
        for &(place, weight) in &candidate.produce {
            *self.marking.tokens_mut(place) += weight;
        }
        self.tracker.mark_fired(candidate.transition);
        *self.firing_counts.entry(candidate.transition).or_insert(0) += 1;

        let name = self
            .net
            .transition(candidate.transition)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| candidate.transition.to_string());
        log::debug!("t={:.6}: fired `{}`", now, name);
        self.trace.push(FiringEvent {
            step,
            time: now,
            transition: name,
        });
    }

    /// 持续推进直到终止状态。只会因 `max_steps`、`end_time`、
    /// 死锁或取消而结束。
    pub fn run(&mut self) -> RunSummary {
        while !self.status.is_terminal() {
            self.step();
        }
        self.summary()
    }

    /// 在下一步时刻不超过 `end_time` 时持续推进。若未出现终止情形，状态保持 `Running`，
    /// 之后可以继续运行。
    pub fn run_until(&mut self, end_time: f64) -> RunSummary {
        while !self.status.is_terminal() && self.next_time() <= end_time + TIME_EPSILON {
            self.step();
        }
        self.summary()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            seed: self.config.seed,
            steps: self.step,
            final_time: self.time,
            status: self.status,
            final_marking: self.net.marking_by_name(&self.marking),
            firing_counts: self
                .firing_counts
                .iter()
                .filter_map(|(id, count)| {
                    self.net
                        .transition(*id)
                        .map(|t| (t.name.clone(), *count))
                })
                .collect(),
            trace: self.trace.clone(),
            fault_count: self.fault_count,
        }
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    pub fn marking(&self) -> &Marking {
        &self.marking
    }

    pub fn tokens(&self, place: &str) -> Option<Tokens> {
        self.net
            .place_id(place)
            .map(|id| self.marking.tokens(id))
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_index(&self) -> u64 {
        self.step
    }

    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    pub fn record(&self, transition: TransitionId) -> Option<&EnablementRecord> {
        self.tracker.record(transition)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn subscribe<O>(&mut self, observer: O) -> SubscriptionId
    where
        O: Observer + Send + 'static,
    {
        self.notifier.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // ---- edits ----

    pub fn add_place(&mut self, place: Place) -> Result<PlaceId, ModelInconsistencyError> {
        let tokens = place.tokens;
        let id = self.net.add_place(place)?;
        *self.marking.tokens_mut(id) = tokens;
        self.publish(ModelEvent::Created(ElementRef::Place(id)));
        Ok(id)
    }

    pub fn add_transition(
        &mut self,
        transition: Transition,
    ) -> Result<TransitionId, ModelInconsistencyError> {
        let id = self.net.add_transition(transition)?;
        self.publish(ModelEvent::Created(ElementRef::Transition(id)));
        Ok(id)
    }

    pub fn add_arc(&mut self, arc: Arc) -> Result<ArcId, ModelInconsistencyError> {
        let id = self.net.add_arc(arc)?;
        self.publish(ModelEvent::Created(ElementRef::Arc(id)));
        Ok(id)
    }

    /// 替换变迁定义；其使能记录重新开始。
    pub fn update_transition(
        &mut self,
        id: TransitionId,
        transition: Transition,
    ) -> Result<Transition, ModelInconsistencyError> {
        let old = self.net.replace_transition(id, transition)?;
        self.publish(ModelEvent::Modified(ElementRef::Transition(id)));
        Ok(old)
    }

    pub fn update_arc(&mut self, id: ArcId, arc: Arc) -> Result<Arc, ModelInconsistencyError> {
        let old = self.net.replace_arc(id, arc)?;
        self.publish(ModelEvent::Modified(ElementRef::Arc(id)));
        Ok(old)
    }

    /// 同时设置库所的当前标识与初始标识。
    pub fn set_tokens(&mut self, id: PlaceId, tokens: Tokens) -> Result<(), ModelInconsistencyError> {
        self.net.set_tokens(id, tokens)?;
        *self.marking.tokens_mut(id) = tokens;
        self.publish(ModelEvent::Modified(ElementRef::Place(id)));
        Ok(())
    }

    pub fn remove_place(&mut self, id: PlaceId) -> Result<Place, ModelInconsistencyError> {
        let (place, detached) = self.net.remove_place(id)?;
        *self.marking.tokens_mut(id) = 0.0;
        for arc in detached {
            self.publish(ModelEvent::Deleted(ElementRef::Arc(arc)));
        }
        self.publish(ModelEvent::Deleted(ElementRef::Place(id)));
        Ok(place)
    }

    pub fn remove_transition(
        &mut self,
        id: TransitionId,
    ) -> Result<Transition, ModelInconsistencyError> {
        let (transition, detached) = self.net.remove_transition(id)?;
        for arc in detached {
            self.publish(ModelEvent::Deleted(ElementRef::Arc(arc)));
        }
        self.firing_counts.shift_remove(&id);
        self.publish(ModelEvent::Deleted(ElementRef::Transition(id)));
        Ok(transition)
    }

    pub fn remove_arc(&mut self, id: ArcId) -> Result<Arc, ModelInconsistencyError> {
        let arc = self.net.remove_arc(id)?;
        self.publish(ModelEvent::Deleted(ElementRef::Arc(id)));
        Ok(arc)
    }

    fn publish(&mut self, event: ModelEvent) {
        self.cache.observe(&event);
        if let ModelEvent::Modified(ElementRef::Transition(id))
        | ModelEvent::Deleted(ElementRef::Transition(id)) = event
        {
            self.tracker.purge(id);
        }
        // a structural edit may unblock a deadlocked net
        if self.status == SimulationStatus::Deadlocked {
            self.status = SimulationStatus::Running;
        }
        self.notifier.publish(&event);
    }
}

/// 在 `now` 时刻依据 `marking` 重新判定每个变迁的使能状态。
/// 返回使能变迁解析后的弧，以及途中遇到的错误。
fn refresh(
    net: &Net,
    cache: &BehaviorCache,
    tracker: &mut EnablementTracker,
    rng: &mut StdRng,
    marking: &Marking,
    now: f64,
) -> (IndexMap<TransitionId, ResolvedArcs>, Vec<TransitionFault>) {
    let mut resolved = IndexMap::new();
    let mut faults = Vec::new();

    for (id, transition) in net.transitions() {
        let Some(compiled) = cache.transition(id) else {
            continue;
        };
        let behavior = match &compiled.behavior {
            Ok(behavior) => behavior.as_ref(),
            Err(error) => {
                tracker.disable(id);
                faults.push(TransitionFault {
                    transition: id,
                    element: ElementRef::Transition(id),
                    error: error.clone(),
                });
                continue;
            }
        };
        let guard = compiled.guard.as_ref();
        match enablement(net, cache, id, transition, guard, marking, now) {
            Ok(Some(arcs)) => {
                tracker.update(id, true, now, behavior, rng);
                resolved.insert(id, arcs);
            }
            Ok(None) => {
                tracker.disable(id);
            }
            Err(fault) => {
                tracker.disable(id);
                faults.push(fault);
            }
        }
    }
    (resolved, faults)
}

fn enablement(
    net: &Net,
    cache: &BehaviorCache,
    id: TransitionId,
    transition: &Transition,
    guard: Result<&Option<CompiledExpr>, &ExpressionError>,
    marking: &Marking,
    now: f64,
) -> Result<Option<ResolvedArcs>, TransitionFault> {
    let scope = Scope::new(net, marking, now, transition.parameters());
    let fault = move |element: ElementRef| {
        move |error: ExpressionError| TransitionFault {
            transition: id,
            element,
            error,
        }
    };

    let mut consume = SmallVec::new();
    for (arc_id, arc) in net.input_arcs(id) {
        let weight = resolve_weight(cache, arc_id, arc, &scope)
            .map_err(fault(ElementRef::Arc(arc_id)))?;
        let tokens = marking.tokens(arc.place);
        match arc.kind {
            ArcKind::Normal if tokens < weight => return Ok(None),
            ArcKind::Normal => consume.push((arc.place, weight)),
            ArcKind::Inhibitor if tokens >= weight => return Ok(None),
            ArcKind::Inhibitor => {}
        }
    }

    match guard {
        Ok(Some(guard)) => {
            let open = guard
                .evaluate_bool(&scope)
                .map_err(fault(ElementRef::Transition(id)))?;
            if !open {
                return Ok(None);
            }
        }
        Ok(None) => {}
        Err(error) => return Err(fault(ElementRef::Transition(id))(error.clone())),
    }

    let mut produce = SmallVec::new();
    for (arc_id, arc) in net.output_arcs(id) {
        let weight = resolve_weight(cache, arc_id, arc, &scope)
            .map_err(fault(ElementRef::Arc(arc_id)))?;
        produce.push((arc.place, weight));
    }
    Ok(Some(ResolvedArcs { consume, produce }))
}

/// 有阈值表达式时取其值，否则取固定权重；结果不为负。
fn resolve_weight(
    cache: &BehaviorCache,
    id: ArcId,
    arc: &Arc,
    scope: &Scope<'_>,
) -> Result<Tokens, ExpressionError> {
    let Some(source) = arc.threshold.as_deref() else {
        return Ok(arc.weight.max(0.0));
    };
    let value = match cache.threshold(id) {
        Some(Ok(expr)) => expr.evaluate_number(scope)?,
        Some(Err(error)) => return Err(error.clone()),
        None => CompiledExpr::compile(source)?.evaluate_number(scope)?,
    };
    Ok(value.max(0.0))
}
