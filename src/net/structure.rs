//! 混合网静态结构元素：库所、迁移（四种时间语义）、弧与标识。
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::IndexVec;

/// 库所持有的托肯量：离散语义下为整数，连续流下为实数。
pub type Tokens = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    #[default]
    Discrete,
    Continuous,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct Place {
    pub name: String,
    pub tokens: Tokens,
    pub capacity: Option<Tokens>,
    pub place_type: PlaceType,
}

impl Place {
    pub fn new(name: impl Into<String>, tokens: Tokens) -> Self {
        Self {
            name: name.into(),
            tokens,
            capacity: None,
            place_type: PlaceType::Discrete,
        }
    }

    pub fn continuous(name: impl Into<String>, tokens: Tokens) -> Self {
        Self {
            place_type: PlaceType::Continuous,
            ..Self::new(name, tokens)
        }
    }

    pub fn with_capacity(mut self, capacity: Tokens) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// 连续变迁的参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContinuousSpec {
    /// 每步求值；缺省时使用 `rate`。
    pub rate_function: Option<String>,
    pub rate: f64,
    pub min_rate: Option<f64>,
    pub max_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionType {
    Immediate,
    Timed { earliest: f64, latest: f64 },
    Stochastic { rate: f64 },
    Continuous(ContinuousSpec),
}

impl TransitionType {
    pub fn name(&self) -> &'static str {
        match self {
            TransitionType::Immediate => "immediate",
            TransitionType::Timed { .. } => "timed",
            TransitionType::Stochastic { .. } => "stochastic",
            TransitionType::Continuous(_) => "continuous",
        }
    }

    pub fn is_discrete(&self) -> bool {
        !matches!(self, TransitionType::Continuous(_))
    }

    pub fn continuous(rate_function: impl Into<String>) -> Self {
        TransitionType::Continuous(ContinuousSpec {
            rate_function: Some(rate_function.into()),
            ..ContinuousSpec::default()
        })
    }
}

/// 导入器附加的动力学注解，引擎只使用 `parameters`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KineticMetadata {
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub parameters: IndexMap<String, f64>,
    #[serde(default)]
    pub rate_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub name: String,
    pub transition_type: TransitionType,
    pub guard: Option<String>,
    pub priority: i32,
    pub kinetics: Option<KineticMetadata>,
}

impl Transition {
    pub fn new(name: impl Into<String>, transition_type: TransitionType) -> Self {
        Self {
            name: name.into(),
            transition_type,
            guard: None,
            priority: 0,
            kinetics: None,
        }
    }

    pub fn immediate(name: impl Into<String>) -> Self {
        Self::new(name, TransitionType::Immediate)
    }

    pub fn timed(name: impl Into<String>, earliest: f64, latest: f64) -> Self {
        Self::new(name, TransitionType::Timed { earliest, latest })
    }

    pub fn stochastic(name: impl Into<String>, rate: f64) -> Self {
        Self::new(name, TransitionType::Stochastic { rate })
    }

    pub fn continuous(name: impl Into<String>, rate_function: impl Into<String>) -> Self {
        Self::new(name, TransitionType::continuous(rate_function))
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.kinetics
            .get_or_insert_with(KineticMetadata::default)
            .parameters
            .insert(name.into(), value);
        self
    }

    pub fn parameters(&self) -> Option<&IndexMap<String, f64>> {
        self.kinetics.as_ref().map(|k| &k.parameters)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition")
            .field(&self.name)
            .field(&self.transition_type.name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArcKind {
    #[default]
    Normal,
    /// 仅当库所托肯少于权重时使能，不消耗托肯。
    Inhibitor,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Arc {
    pub place: PlaceId,
    pub transition: TransitionId,
    pub direction: ArcDirection,
    pub weight: Tokens,
    /// 存在时覆盖 `weight`。
    pub threshold: Option<String>,
    pub kind: ArcKind,
}

impl Arc {
    pub fn new(
        place: PlaceId,
        transition: TransitionId,
        direction: ArcDirection,
        weight: Tokens,
    ) -> Self {
        Self {
            place,
            transition,
            direction,
            weight,
            threshold: None,
            kind: ArcKind::Normal,
        }
    }

    pub fn input(place: PlaceId, transition: TransitionId, weight: Tokens) -> Self {
        Self::new(place, transition, ArcDirection::PlaceToTransition, weight)
    }

    pub fn output(place: PlaceId, transition: TransitionId, weight: Tokens) -> Self {
        Self::new(place, transition, ArcDirection::TransitionToPlace, weight)
    }

    pub fn inhibitor(place: PlaceId, transition: TransitionId, weight: Tokens) -> Self {
        Self {
            kind: ArcKind::Inhibitor,
            ..Self::input(place, transition, weight)
        }
    }

    pub fn with_threshold(mut self, threshold: impl Into<String>) -> Self {
        self.threshold = Some(threshold.into());
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == ArcDirection::PlaceToTransition
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arc")
            .field("place", &self.place)
            .field("transition", &self.transition)
            .field("direction", &self.direction)
            .field("weight", &self.weight)
            .field("threshold", &self.threshold)
            .field("kind", &self.kind)
            .finish()
    }
}

/// 按库所索引的标识向量，已删除库所的槽位保持为零。
#[derive(Clone, PartialEq, Default)]
pub struct Marking(pub IndexVec<PlaceId, Tokens>);

impl Marking {
    pub fn new(initial: IndexVec<PlaceId, Tokens>) -> Self {
        Self(initial)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &Tokens)> {
        self.0.iter_enumerated()
    }

    /// 超出向量末尾的库所视为没有托肯。
    pub fn tokens(&self, place: PlaceId) -> Tokens {
        self.0.get(place).copied().unwrap_or(0.0)
    }

    pub fn tokens_mut(&mut self, place: PlaceId) -> &mut Tokens {
        if self.0.get(place).is_none() {
            self.0.resize_with(place.0 as usize + 1, || 0.0);
        }
        &mut self.0[place]
    }

    pub fn into_inner(self) -> IndexVec<PlaceId, Tokens> {
        self.0
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, tokens);
        }
        map.finish()
    }
}
