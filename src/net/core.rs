//! 混合网结构容器：元素增删改、结构校验、连通性诊断与 DOT 导出。
//!
//! 结构校验在仿真开始前执行，任何 [`ModelInconsistencyError`] 都会拒绝启动。
use std::fmt::{self, Write as FmtWrite};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::net::ids::{ArcId, PlaceId, TransitionId};
use crate::net::incidence::Incidence;
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{
    Arc, ArcDirection, ArcKind, Marking, Place, Tokens, Transition, TransitionType,
};

/// 表达式先于库所与参数解析的名字，
/// 以及表达式编译器直接拒绝的词。
pub const RESERVED_NAMES: &[&str] = &[
    "t", "pi", "e", "true", "false", "True", "False", "and", "or", "not", "import", "lambda",
    "exec", "eval", "open", "compile", "globals", "locals", "getattr", "setattr",
];

/// 名为 `name` 的库所或参数是否无法被表达式读取。
/// 双下划线开头的名字同样会被表达式编译器拒绝。
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name) || name.starts_with("__")
}

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelInconsistencyError {
    #[error("duplicate place name `{0}`")]
    DuplicatePlace(String),
    #[error("duplicate transition name `{0}`")]
    DuplicateTransition(String),
    #[error("`{0}` is reserved in expressions and cannot name a place or parameter")]
    ReservedName(String),
    #[error("an arc {direction:?} between `{place}` and `{transition}` already exists")]
    DuplicateArc {
        place: String,
        transition: String,
        direction: ArcDirection,
    },
    #[error("unknown place {0}")]
    UnknownPlace(PlaceId),
    #[error("unknown transition {0}")]
    UnknownTransition(TransitionId),
    #[error("unknown arc {0}")]
    UnknownArc(ArcId),
    #[error("unknown element `{0}`")]
    UnknownName(String),
    #[error("transition `{transition}`: earliest {earliest} exceeds latest {latest}")]
    InvertedInterval {
        transition: String,
        earliest: f64,
        latest: f64,
    },
    #[error("transition `{transition}`: timing bound {value} must be finite and non-negative")]
    InvalidBound { transition: String, value: f64 },
    #[error("transition `{transition}`: stochastic rate {rate} must be positive")]
    NonPositiveRate { transition: String, rate: f64 },
    #[error("transition `{transition}`: rate {value} must be finite")]
    NonFiniteRate { transition: String, value: f64 },
    #[error("transition `{transition}`: min_rate {min} exceeds max_rate {max}")]
    InvertedRateBounds {
        transition: String,
        min: f64,
        max: f64,
    },
    #[error("arc between `{place}` and `{transition}`: weight {weight} must be finite and non-negative")]
    InvalidWeight {
        place: String,
        transition: String,
        weight: Tokens,
    },
    #[error("place `{place}`: marking {tokens} must be finite and non-negative")]
    InvalidMarking { place: String, tokens: Tokens },
    #[error("place `{place}`: capacity {capacity} must be finite and non-negative")]
    InvalidCapacity { place: String, capacity: Tokens },
    #[error("place `{place}`: marking {tokens} exceeds capacity {capacity}")]
    OverCapacity {
        place: String,
        tokens: Tokens,
        capacity: Tokens,
    },
    #[error("inhibitor arc from `{transition}` to `{place}` must lead into the transition")]
    InhibitorOutput { place: String, transition: String },
}

/// 网结构诊断报告
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    /// 孤立库所（无任何连接的弧）
    pub isolated_places: Vec<(PlaceId, String)>,
    /// 孤立迁移
    pub isolated_transitions: Vec<(TransitionId, String)>,
    /// 无输入弧的迁移：只要守卫成立便持续可激发
    pub source_transitions: Vec<(TransitionId, String)>,
    /// 无法在表达式中引用的库所名
    pub unreferenceable_places: Vec<(PlaceId, String)>,
    pub total_places: usize,
    pub total_transitions: usize,
    pub total_arcs: usize,
}

impl DiagnosticReport {
    pub fn has_issues(&self) -> bool {
        !self.isolated_places.is_empty()
            || !self.isolated_transitions.is_empty()
            || !self.source_transitions.is_empty()
            || !self.unreferenceable_places.is_empty()
    }
}

#[derive(Clone)]
pub struct Net {
    places: IndexVec<PlaceId, Option<Place>>,
    transitions: IndexVec<TransitionId, Option<Transition>>,
    arcs: IndexVec<ArcId, Option<Arc>>,
    pre: Incidence<Option<ArcId>>,
    post: Incidence<Option<ArcId>>,
    place_names: IndexMap<String, PlaceId>,
    transition_names: IndexMap<String, TransitionId>,
}

impl fmt::Debug for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Net")
            .field("places", &self.places)
            .field("transitions", &self.transitions)
            .field("arcs", &self.arcs)
            .finish()
    }
}

impl Net {
    pub fn empty() -> Self {
        Self {
            places: IndexVec::new(),
            transitions: IndexVec::new(),
            arcs: IndexVec::new(),
            pre: Incidence::new(0, 0, None),
            post: Incidence::new(0, 0, None),
            place_names: IndexMap::new(),
            transition_names: IndexMap::new(),
        }
    }

    pub fn add_place(&mut self, place: Place) -> Result<PlaceId, ModelInconsistencyError> {
        check_place(&place)?;
        if self.place_names.contains_key(&place.name) {
            return Err(ModelInconsistencyError::DuplicatePlace(place.name));
        }
        let place_id = self.places.next_index();
        self.place_names.insert(place.name.clone(), place_id);
        self.places.push(Some(place));
        self.pre.push_place_with_default(None);
        self.post.push_place_with_default(None);
        Ok(place_id)
    }

    pub fn add_transition(
        &mut self,
        transition: Transition,
    ) -> Result<TransitionId, ModelInconsistencyError> {
        check_transition(&transition)?;
        if self.transition_names.contains_key(&transition.name) {
            return Err(ModelInconsistencyError::DuplicateTransition(
                transition.name,
            ));
        }
        let transition_id = self.transitions.next_index();
        self.transition_names
            .insert(transition.name.clone(), transition_id);
        self.transitions.push(Some(transition));
        self.pre.push_transition_with_default(None);
        self.post.push_transition_with_default(None);
        Ok(transition_id)
    }

    pub fn add_arc(&mut self, arc: Arc) -> Result<ArcId, ModelInconsistencyError> {
        self.check_arc(&arc, None)?;
        let arc_id = self.arcs.next_index();
        self.matrix_mut(arc.direction)
            .set(arc.place, arc.transition, Some(arc_id));
        self.arcs.push(Some(arc));
        Ok(arc_id)
    }

    /// 以名字连接输入弧 place -> transition
    pub fn connect_input(
        &mut self,
        place: &str,
        transition: &str,
        weight: Tokens,
    ) -> Result<ArcId, ModelInconsistencyError> {
        let (p, t) = self.resolve_pair(place, transition)?;
        self.add_arc(Arc::input(p, t, weight))
    }

    /// 以名字连接输出弧 transition -> place
    pub fn connect_output(
        &mut self,
        transition: &str,
        place: &str,
        weight: Tokens,
    ) -> Result<ArcId, ModelInconsistencyError> {
        let (p, t) = self.resolve_pair(place, transition)?;
        self.add_arc(Arc::output(p, t, weight))
    }

    /// 换入新定义并返回旧定义，弧保持连接。
    pub fn replace_transition(
        &mut self,
        id: TransitionId,
        transition: Transition,
    ) -> Result<Transition, ModelInconsistencyError> {
        check_transition(&transition)?;
        let current = self
            .transitions
            .live(id)
            .ok_or(ModelInconsistencyError::UnknownTransition(id))?;
        if current.name != transition.name {
            if self.transition_names.contains_key(&transition.name) {
                return Err(ModelInconsistencyError::DuplicateTransition(
                    transition.name,
                ));
            }
            let old_name = current.name.clone();
            self.transition_names.shift_remove(&old_name);
            self.transition_names.insert(transition.name.clone(), id);
        }
        let slot = self
            .transitions
            .live_mut(id)
            .ok_or(ModelInconsistencyError::UnknownTransition(id))?;
        Ok(std::mem::replace(slot, transition))
    }

    pub fn replace_arc(&mut self, id: ArcId, arc: Arc) -> Result<Arc, ModelInconsistencyError> {
        let old = self
            .arcs
            .live(id)
            .cloned()
            .ok_or(ModelInconsistencyError::UnknownArc(id))?;
        self.check_arc(&arc, Some(id))?;
        self.matrix_mut(old.direction)
            .set(old.place, old.transition, None);
        self.matrix_mut(arc.direction)
            .set(arc.place, arc.transition, Some(id));
        self.arcs[id] = Some(arc);
        Ok(old)
    }

    /// 设置库所的初始标识。
    pub fn set_tokens(
        &mut self,
        id: PlaceId,
        tokens: Tokens,
    ) -> Result<(), ModelInconsistencyError> {
        let place = self
            .places
            .live_mut(id)
            .ok_or(ModelInconsistencyError::UnknownPlace(id))?;
        let mut updated = place.clone();
        updated.tokens = tokens;
        check_place(&updated)?;
        *place = updated;
        Ok(())
    }

    /// 删除库所及与其相连的所有弧。
    pub fn remove_place(
        &mut self,
        id: PlaceId,
    ) -> Result<(Place, Vec<ArcId>), ModelInconsistencyError> {
        let place = self
            .places
            .take(id)
            .ok_or(ModelInconsistencyError::UnknownPlace(id))?;
        self.place_names.shift_remove(&place.name);
        let detached = self
            .pre
            .row(id)
            .chain(self.post.row(id))
            .filter_map(|(_, cell)| *cell)
            .collect::<Vec<_>>();
        for arc in &detached {
            self.arcs.take(*arc);
        }
        self.pre.fill_row(id, None);
        self.post.fill_row(id, None);
        Ok((place, detached))
    }

    /// 删除变迁及与其相连的所有弧。
    pub fn remove_transition(
        &mut self,
        id: TransitionId,
    ) -> Result<(Transition, Vec<ArcId>), ModelInconsistencyError> {
        let transition = self
            .transitions
            .take(id)
            .ok_or(ModelInconsistencyError::UnknownTransition(id))?;
        self.transition_names.shift_remove(&transition.name);
        let detached = self
            .pre
            .column(id)
            .chain(self.post.column(id))
            .filter_map(|(_, cell)| *cell)
            .collect::<Vec<_>>();
        for arc in &detached {
            self.arcs.take(*arc);
        }
        self.pre.fill_column(id, None);
        self.post.fill_column(id, None);
        Ok((transition, detached))
    }

    pub fn remove_arc(&mut self, id: ArcId) -> Result<Arc, ModelInconsistencyError> {
        let arc = self
            .arcs
            .take(id)
            .ok_or(ModelInconsistencyError::UnknownArc(id))?;
        self.matrix_mut(arc.direction)
            .set(arc.place, arc.transition, None);
        Ok(arc)
    }

    pub fn place(&self, id: PlaceId) -> Option<&Place> {
        self.places.live(id)
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.live(id)
    }

    pub fn arc(&self, id: ArcId) -> Option<&Arc> {
        self.arcs.live(id)
    }

    pub fn place_id(&self, name: &str) -> Option<PlaceId> {
        self.place_names.get(name).copied()
    }

    pub fn transition_id(&self, name: &str) -> Option<TransitionId> {
        self.transition_names.get(name).copied()
    }

    pub fn places(&self) -> impl Iterator<Item = (PlaceId, &Place)> {
        self.places.iter_live()
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.transitions.iter_live()
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs.iter_live()
    }

    pub fn places_len(&self) -> usize {
        self.places.live_count()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.live_count()
    }

    /// 指向 `transition` 的弧（普通弧与抑制弧），按库所顺序。
    pub fn input_arcs(&self, transition: TransitionId) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs_in(&self.pre, transition)
    }

    pub fn output_arcs(&self, transition: TransitionId) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs_in(&self.post, transition)
    }

    pub fn initial_marking(&self) -> Marking {
        Marking::new(IndexVec::from(
            self.places
                .iter()
                .map(|slot| slot.as_ref().map(|p| p.tokens).unwrap_or(0.0))
                .collect::<Vec<_>>(),
        ))
    }

    /// 以库所名为键的标识，按插入顺序。
    pub fn marking_by_name(&self, marking: &Marking) -> IndexMap<String, Tokens> {
        self.places()
            .map(|(id, place)| (place.name.clone(), marking.tokens(id)))
            .collect()
    }

    /// 重新检查所有元素，仿真开始前调用。
    pub fn validate(&self) -> Result<(), ModelInconsistencyError> {
        for (_, place) in self.places() {
            check_place(place)?;
        }
        for (_, transition) in self.transitions() {
            check_transition(transition)?;
        }
        for (id, arc) in self.arcs() {
            self.check_arc_endpoints(arc)?;
            check_weight(self, arc)?;
            if arc.kind == ArcKind::Inhibitor && !arc.is_input() {
                return Err(self.inhibitor_error(arc));
            }
            if *self.matrix(arc.direction).get(arc.place, arc.transition) != Some(id) {
                return Err(self.duplicate_arc_error(arc));
            }
        }
        Ok(())
    }

    pub fn diagnose(&self) -> DiagnosticReport {
        let mut report = DiagnosticReport {
            total_places: self.places_len(),
            total_transitions: self.transitions_len(),
            total_arcs: self.arcs.live_count(),
            ..DiagnosticReport::default()
        };

        for (place_id, place) in self.places() {
            let connected = self
                .pre
                .row(place_id)
                .chain(self.post.row(place_id))
                .any(|(_, cell)| cell.is_some());
            if !connected {
                report.isolated_places.push((place_id, place.name.clone()));
            }
            if !IDENTIFIER.is_match(&place.name) {
                report
                    .unreferenceable_places
                    .push((place_id, place.name.clone()));
            }
        }

        for (transition_id, transition) in self.transitions() {
            let has_preset = self
                .input_arcs(transition_id)
                .any(|(_, arc)| arc.kind == ArcKind::Normal);
            let has_postset = self.output_arcs(transition_id).next().is_some();
            let has_any_input = self.input_arcs(transition_id).next().is_some();
            if !has_any_input && !has_postset {
                report
                    .isolated_transitions
                    .push((transition_id, transition.name.clone()));
            } else if !has_preset {
                report
                    .source_transitions
                    .push((transition_id, transition.name.clone()));
            }
        }

        report
    }

    pub fn log_diagnostics(&self) {
        let report = self.diagnose();
        if !report.has_issues() {
            log::info!(
                "net check passed: {} places, {} transitions, {} arcs",
                report.total_places,
                report.total_transitions,
                report.total_arcs
            );
            return;
        }
        for (id, name) in &report.isolated_places {
            log::warn!("isolated place `{}` ({})", name, id);
        }
        for (id, name) in &report.isolated_transitions {
            log::warn!("isolated transition `{}` ({})", name, id);
        }
        for (id, name) in &report.source_transitions {
            log::warn!(
                "transition `{}` ({}) has no input place and stays enabled",
                name,
                id
            );
        }
        for (id, name) in &report.unreferenceable_places {
            log::warn!(
                "place `{}` ({}) is not a valid identifier and cannot appear in expressions",
                name,
                id
            );
        }
    }

    pub fn to_dot(&self, marking: Option<&Marking>) -> String {
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph HybridNet {{");
        let _ = writeln!(&mut dot, "    rankdir=LR;");
        let _ = writeln!(&mut dot, "    node [fontname=\"Helvetica\"];");

        for (place_id, place) in self.places() {
            let tokens = marking.map_or(place.tokens, |m| m.tokens(place_id));
            let capacity = place
                .capacity
                .map_or_else(|| "∞".to_string(), |c| c.to_string());
            let _ = writeln!(
                &mut dot,
                "    place_{} [label=\"{}\\n{}/{}\", shape=circle, style=filled, fillcolor=\"#e3f2fd\"];",
                place_id.index(),
                escape_label(&place.name),
                tokens,
                capacity
            );
        }

        for (transition_id, transition) in self.transitions() {
            let shape = match transition.transition_type {
                TransitionType::Continuous(_) => "box, peripheries=2",
                TransitionType::Immediate => "box, height=0.2",
                _ => "box",
            };
            let _ = writeln!(
                &mut dot,
                "    trans_{} [label=\"{}\\n{}\", shape={}, style=filled, fillcolor=\"#ffe0b2\"];",
                transition_id.index(),
                escape_label(&transition.name),
                transition.transition_type.name(),
                shape
            );
        }

        for (_, arc) in self.arcs() {
            let place_node = format!("place_{}", arc.place.index());
            let transition_node = format!("trans_{}", arc.transition.index());
            let (from, to) = match arc.direction {
                ArcDirection::PlaceToTransition => (place_node, transition_node),
                ArcDirection::TransitionToPlace => (transition_node, place_node),
            };
            let mut attrs = Vec::new();
            if let Some(threshold) = &arc.threshold {
                attrs.push(format!("label=\"{}\"", escape_label(threshold)));
            } else if arc.weight != 1.0 {
                attrs.push(format!("label=\"{}\"", arc.weight));
            }
            if arc.kind == ArcKind::Inhibitor {
                attrs.push("arrowhead=odot".to_string());
            }
            if attrs.is_empty() {
                let _ = writeln!(&mut dot, "    {} -> {};", from, to);
            } else {
                let _ = writeln!(&mut dot, "    {} -> {} [{}];", from, to, attrs.join(", "));
            }
        }

        let _ = writeln!(&mut dot, "}}");
        dot
    }

    pub fn write_dot<P: AsRef<Path>>(&self, path: P, marking: Option<&Marking>) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_dot(marking))
    }

    fn arcs_in<'a>(
        &'a self,
        matrix: &'a Incidence<Option<ArcId>>,
        transition: TransitionId,
    ) -> impl Iterator<Item = (ArcId, &'a Arc)> + 'a {
        let in_range = transition.index() < matrix.transitions();
        in_range
            .then(|| matrix.column(transition))
            .into_iter()
            .flatten()
            .filter_map(move |(_, cell)| {
                let id = (*cell)?;
                self.arcs.live(id).map(|arc| (id, arc))
            })
    }

    fn matrix(&self, direction: ArcDirection) -> &Incidence<Option<ArcId>> {
        match direction {
            ArcDirection::PlaceToTransition => &self.pre,
            ArcDirection::TransitionToPlace => &self.post,
        }
    }

    fn matrix_mut(&mut self, direction: ArcDirection) -> &mut Incidence<Option<ArcId>> {
        match direction {
            ArcDirection::PlaceToTransition => &mut self.pre,
            ArcDirection::TransitionToPlace => &mut self.post,
        }
    }

    fn resolve_pair(
        &self,
        place: &str,
        transition: &str,
    ) -> Result<(PlaceId, TransitionId), ModelInconsistencyError> {
        let p = self
            .place_id(place)
            .ok_or_else(|| ModelInconsistencyError::UnknownName(place.to_string()))?;
        let t = self
            .transition_id(transition)
            .ok_or_else(|| ModelInconsistencyError::UnknownName(transition.to_string()))?;
        Ok((p, t))
    }

    fn check_arc(&self, arc: &Arc, replacing: Option<ArcId>) -> Result<(), ModelInconsistencyError> {
        self.check_arc_endpoints(arc)?;
        check_weight(self, arc)?;
        if arc.kind == ArcKind::Inhibitor && !arc.is_input() {
            return Err(self.inhibitor_error(arc));
        }
        match self.matrix(arc.direction).get(arc.place, arc.transition) {
            Some(existing) if Some(*existing) != replacing => Err(self.duplicate_arc_error(arc)),
            _ => Ok(()),
        }
    }

    fn check_arc_endpoints(&self, arc: &Arc) -> Result<(), ModelInconsistencyError> {
        if self.place(arc.place).is_none() {
            return Err(ModelInconsistencyError::UnknownPlace(arc.place));
        }
        if self.transition(arc.transition).is_none() {
            return Err(ModelInconsistencyError::UnknownTransition(arc.transition));
        }
        Ok(())
    }

    fn endpoint_names(&self, arc: &Arc) -> (String, String) {
        (
            self.place(arc.place)
                .map_or_else(|| arc.place.to_string(), |p| p.name.clone()),
            self.transition(arc.transition)
                .map_or_else(|| arc.transition.to_string(), |t| t.name.clone()),
        )
    }

    fn duplicate_arc_error(&self, arc: &Arc) -> ModelInconsistencyError {
        let (place, transition) = self.endpoint_names(arc);
        ModelInconsistencyError::DuplicateArc {
            place,
            transition,
            direction: arc.direction,
        }
    }

    fn inhibitor_error(&self, arc: &Arc) -> ModelInconsistencyError {
        let (place, transition) = self.endpoint_names(arc);
        ModelInconsistencyError::InhibitorOutput { place, transition }
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::empty()
    }
}

fn check_place(place: &Place) -> Result<(), ModelInconsistencyError> {
    if is_reserved(&place.name) {
        return Err(ModelInconsistencyError::ReservedName(place.name.clone()));
    }
    if !place.tokens.is_finite() || place.tokens < 0.0 {
        return Err(ModelInconsistencyError::InvalidMarking {
            place: place.name.clone(),
            tokens: place.tokens,
        });
    }
    if let Some(capacity) = place.capacity {
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(ModelInconsistencyError::InvalidCapacity {
                place: place.name.clone(),
                capacity,
            });
        }
        if place.tokens > capacity {
            return Err(ModelInconsistencyError::OverCapacity {
                place: place.name.clone(),
                tokens: place.tokens,
                capacity,
            });
        }
    }
    Ok(())
}

fn check_transition(transition: &Transition) -> Result<(), ModelInconsistencyError> {
    let name = || transition.name.clone();
    match &transition.transition_type {
        TransitionType::Immediate => {}
        TransitionType::Timed { earliest, latest } => {
            for value in [*earliest, *latest] {
                if !value.is_finite() || value < 0.0 {
                    return Err(ModelInconsistencyError::InvalidBound {
                        transition: name(),
                        value,
                    });
                }
            }
            if earliest > latest {
                return Err(ModelInconsistencyError::InvertedInterval {
                    transition: name(),
                    earliest: *earliest,
                    latest: *latest,
                });
            }
        }
        TransitionType::Stochastic { rate } => {
            if !rate.is_finite() {
                return Err(ModelInconsistencyError::NonFiniteRate {
                    transition: name(),
                    value: *rate,
                });
            }
            if *rate <= 0.0 {
                return Err(ModelInconsistencyError::NonPositiveRate {
                    transition: name(),
                    rate: *rate,
                });
            }
        }
        TransitionType::Continuous(spec) => {
            for value in [Some(spec.rate), spec.min_rate, spec.max_rate]
                .into_iter()
                .flatten()
            {
                if !value.is_finite() {
                    return Err(ModelInconsistencyError::NonFiniteRate {
                        transition: name(),
                        value,
                    });
                }
            }
            if let (Some(min), Some(max)) = (spec.min_rate, spec.max_rate) {
                if min > max {
                    return Err(ModelInconsistencyError::InvertedRateBounds {
                        transition: name(),
                        min,
                        max,
                    });
                }
            }
        }
    }
    if let Some(parameters) = transition.parameters() {
        if let Some(reserved) = parameters
            .keys()
            .find(|key| is_reserved(key))
        {
            return Err(ModelInconsistencyError::ReservedName(reserved.clone()));
        }
    }
    Ok(())
}

fn check_weight(net: &Net, arc: &Arc) -> Result<(), ModelInconsistencyError> {
    if arc.weight.is_finite() && arc.weight >= 0.0 {
        return Ok(());
    }
    let (place, transition) = net.endpoint_names(arc);
    Err(ModelInconsistencyError::InvalidWeight {
        place,
        transition,
        weight: arc.weight,
    })
}

fn escape_label(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_place_net() -> (Net, PlaceId, PlaceId, TransitionId) {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("P0", 1.0)).unwrap();
        let p1 = net.add_place(Place::new("P1", 0.0)).unwrap();
        let t0 = net.add_transition(Transition::immediate("T0")).unwrap();
        net.add_arc(Arc::input(p0, t0, 1.0)).unwrap();
        net.add_arc(Arc::output(p1, t0, 1.0)).unwrap();
        (net, p0, p1, t0)
    }

    #[test]
    fn arcs_are_indexed_by_transition() {
        let (net, p0, p1, t0) = two_place_net();
        let inputs = net.input_arcs(t0).map(|(_, a)| a.place).collect::<Vec<_>>();
        let outputs = net.output_arcs(t0).map(|(_, a)| a.place).collect::<Vec<_>>();
        assert_eq!(inputs, vec![p0]);
        assert_eq!(outputs, vec![p1]);
        assert!(net.validate().is_ok());
    }

    #[test]
    fn duplicate_names_and_arcs_are_rejected() {
        let (mut net, p0, _, t0) = two_place_net();
        assert_eq!(
            net.add_place(Place::new("P0", 0.0)),
            Err(ModelInconsistencyError::DuplicatePlace("P0".into()))
        );
        assert!(matches!(
            net.add_arc(Arc::input(p0, t0, 2.0)),
            Err(ModelInconsistencyError::DuplicateArc { .. })
        ));
    }

    #[test]
    fn invalid_timing_is_rejected() {
        let mut net = Net::empty();
        assert!(matches!(
            net.add_transition(Transition::timed("T", 2.0, 1.0)),
            Err(ModelInconsistencyError::InvertedInterval { .. })
        ));
        assert!(matches!(
            net.add_transition(Transition::stochastic("S", 0.0)),
            Err(ModelInconsistencyError::NonPositiveRate { .. })
        ));
        assert!(matches!(
            net.add_transition(Transition::timed("N", -1.0, 1.0)),
            Err(ModelInconsistencyError::InvalidBound { .. })
        ));
        assert_eq!(
            net.add_place(Place::new("t", 0.0)),
            Err(ModelInconsistencyError::ReservedName("t".into()))
        );
        assert!(matches!(
            net.add_place(Place::new("P", 5.0).with_capacity(2.0)),
            Err(ModelInconsistencyError::OverCapacity { .. })
        ));
    }

    #[test]
    fn names_the_expression_compiler_refuses_cannot_be_declared() {
        let mut net = Net::empty();
        for name in ["open", "eval", "lambda", "__secret", "globals"] {
            assert_eq!(
                net.add_place(Place::new(name, 1.0)),
                Err(ModelInconsistencyError::ReservedName(name.into())),
                "{name}"
            );
        }
        assert_eq!(
            net.add_transition(Transition::immediate("T").with_parameter("exec", 1.0)),
            Err(ModelInconsistencyError::ReservedName("exec".into()))
        );
        assert!(net.add_place(Place::new("opened", 1.0)).is_ok());
        assert!(net.add_place(Place::new("_private", 1.0)).is_ok());
        assert_eq!(net.places_len(), 2);
    }

    #[test]
    fn removing_a_place_detaches_its_arcs() {
        let (mut net, p0, _, t0) = two_place_net();
        let (place, detached) = net.remove_place(p0).unwrap();
        assert_eq!(place.name, "P0");
        assert_eq!(detached.len(), 1);
        assert_eq!(net.input_arcs(t0).count(), 0);
        assert_eq!(net.place_id("P0"), None);
        assert!(net.validate().is_ok());
        assert!(matches!(
            net.remove_place(p0),
            Err(ModelInconsistencyError::UnknownPlace(_))
        ));
    }

    #[test]
    fn replace_transition_tracks_renames() {
        let (mut net, _, _, t0) = two_place_net();
        let old = net
            .replace_transition(t0, Transition::timed("T0b", 0.0, 1.0))
            .unwrap();
        assert_eq!(old.name, "T0");
        assert_eq!(net.transition_id("T0"), None);
        assert_eq!(net.transition_id("T0b"), Some(t0));
        assert_eq!(net.input_arcs(t0).count(), 1);
    }

    #[test]
    fn inhibitor_output_is_rejected() {
        let (mut net, p0, _, t0) = two_place_net();
        let mut arc = Arc::inhibitor(p0, t0, 1.0);
        arc.direction = ArcDirection::TransitionToPlace;
        assert!(matches!(
            net.add_arc(arc),
            Err(ModelInconsistencyError::InhibitorOutput { .. })
        ));
    }

    #[test]
    fn diagnose_flags_isolated_and_source_nodes() {
        let mut net = Net::empty();
        net.add_place(Place::new("lonely", 0.0)).unwrap();
        net.add_place(Place::new("out", 0.0)).unwrap();
        net.add_place(Place::new("in", 1.0)).unwrap();
        net.add_transition(Transition::immediate("gen")).unwrap();
        net.add_transition(Transition::immediate("sink")).unwrap();
        net.connect_output("gen", "out", 1.0).unwrap();
        net.connect_input("in", "sink", 1.0).unwrap();
        assert!(matches!(
            net.connect_input("missing", "sink", 1.0),
            Err(ModelInconsistencyError::UnknownName(_))
        ));
        net.add_place(Place::new("not-an-ident", 0.0)).unwrap();

        let report = net.diagnose();
        assert!(report.has_issues());
        assert_eq!(report.isolated_places.len(), 2);
        assert_eq!(report.source_transitions.len(), 1);
        assert_eq!(report.unreferenceable_places.len(), 1);
    }

    #[test]
    fn dot_lists_nodes_and_weighted_arcs() {
        let (mut net, p0, _, t0) = two_place_net();
        let arc = net.input_arcs(t0).next().map(|(id, _)| id).unwrap();
        net.replace_arc(arc, Arc::input(p0, t0, 3.0)).unwrap();
        let dot = net.to_dot(None);
        assert!(dot.starts_with("digraph HybridNet {"));
        assert!(dot.contains("place_0 -> trans_0 [label=\"3\"];"));
        assert!(dot.contains("trans_0 -> place_1;"));
    }
}
