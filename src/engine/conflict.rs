//! 冲突消解：就绪的离散迁移按全序排列，再依次对“步前快照减去已接纳消耗”贪心接纳。
//! 被拒绝的迁移保持可激发状态，下一步重试。
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::config::PolicyName;
use crate::net::{Marking, Net, PlaceId, Tokens, Transition, TransitionId};

pub type Comparator = dyn Fn(&Transition, &Transition) -> Ordering + Send + Sync;

#[derive(Clone, Default)]
pub enum ConflictPolicy {
    /// 按变迁名升序。
    #[default]
    Identifier,
    /// 按优先级降序，同级再按名字。
    Priority,
    Custom(Arc<Comparator>),
}

impl ConflictPolicy {
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&Transition, &Transition) -> Ordering + Send + Sync + 'static,
    {
        ConflictPolicy::Custom(Arc::new(compare))
    }

    pub fn compare(&self, a: &Transition, b: &Transition) -> Ordering {
        let by_name = || a.name.cmp(&b.name);
        match self {
            ConflictPolicy::Identifier => by_name(),
            ConflictPolicy::Priority => b.priority.cmp(&a.priority).then_with(by_name),
            ConflictPolicy::Custom(compare) => compare(a, b).then_with(by_name),
        }
    }
}

impl From<PolicyName> for ConflictPolicy {
    fn from(name: PolicyName) -> Self {
        match name {
            PolicyName::Identifier => ConflictPolicy::Identifier,
            PolicyName::Priority => ConflictPolicy::Priority,
        }
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Identifier => f.write_str("Identifier"),
            ConflictPolicy::Priority => f.write_str("Priority"),
            ConflictPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// 已就绪的离散变迁及其解析后的托肯增减。
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub transition: TransitionId,
    pub consume: SmallVec<[(PlaceId, Tokens); 4]>,
    pub produce: SmallVec<[(PlaceId, Tokens); 4]>,
}

impl Candidate {
    pub fn net_delta(&self, place: PlaceId) -> Tokens {
        let produced: Tokens = self
            .produce
            .iter()
            .filter(|(p, _)| *p == place)
            .map(|(_, w)| w)
            .sum();
        let consumed: Tokens = self
            .consume
            .iter()
            .filter(|(p, _)| *p == place)
            .map(|(_, w)| w)
            .sum();
        produced - consumed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Denial {
    #[error("place {place} has {available} left after earlier firings, {needed} needed")]
    Conflict {
        place: PlaceId,
        needed: Tokens,
        available: Tokens,
    },
    #[error("capacity exceeded at place {place}: {after} > {capacity}")]
    Capacity {
        place: PlaceId,
        after: Tokens,
        capacity: Tokens,
    },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Resolution {
    pub admitted: Vec<Candidate>,
    pub denied: Vec<(Candidate, Denial)>,
}

pub fn order_candidates(net: &Net, policy: &ConflictPolicy, candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        match (net.transition(a.transition), net.transition(b.transition)) {
            (Some(ta), Some(tb)) => policy.compare(ta, tb),
            _ => a.transition.cmp(&b.transition),
        }
    });
}

/// 对 `candidates` 排序，并依据 `snapshot` 贪心地逐个放行。
pub fn resolve(
    net: &Net,
    policy: &ConflictPolicy,
    snapshot: &Marking,
    mut candidates: Vec<Candidate>,
) -> Resolution {
    order_candidates(net, policy, &mut candidates);

    let mut available = snapshot.clone();
    let mut projected = snapshot.clone();
    let mut resolution = Resolution::default();

    for candidate in candidates {
        match admit(net, &available, &projected, &candidate) {
            Ok(()) => {
                for &(place, weight) in &candidate.consume {
                    *available.tokens_mut(place) -= weight;
                    *projected.tokens_mut(place) -= weight;
                }
                for &(place, weight) in &candidate.produce {
                    *projected.tokens_mut(place) += weight;
                }
                resolution.admitted.push(candidate);
            }
            Err(denial) => resolution.denied.push((candidate, denial)),
        }
    }
    resolution
}

fn admit(
    net: &Net,
    available: &Marking,
    projected: &Marking,
    candidate: &Candidate,
) -> Result<(), Denial> {
    for &(place, needed) in &candidate.consume {
        let left = available.tokens(place);
        if left < needed {
            return Err(Denial::Conflict {
                place,
                needed,
                available: left,
            });
        }
    }
    for &(place, _) in &candidate.produce {
        let Some(capacity) = net.place(place).and_then(|p| p.capacity) else {
            continue;
        };
        let after = projected.tokens(place) + candidate.net_delta(place);
        if after > capacity {
            return Err(Denial::Capacity {
                place,
                after,
                capacity,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::net::Place;

    fn shared_place_net() -> (Net, PlaceId, TransitionId, TransitionId) {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("P", 4.0)).unwrap();
        let a = net
            .add_transition(Transition::immediate("A").with_priority(1))
            .unwrap();
        let b = net
            .add_transition(Transition::immediate("B").with_priority(5))
            .unwrap();
        (net, p, a, b)
    }

    fn needs(transition: TransitionId, place: PlaceId, weight: Tokens) -> Candidate {
        Candidate {
            transition,
            consume: smallvec![(place, weight)],
            produce: SmallVec::new(),
        }
    }

    #[test]
    fn identifier_order_admits_the_first_name() {
        let (net, p, a, b) = shared_place_net();
        let snapshot = net.initial_marking();
        let resolution = resolve(
            &net,
            &ConflictPolicy::Identifier,
            &snapshot,
            vec![needs(b, p, 3.0), needs(a, p, 3.0)],
        );
        assert_eq!(resolution.admitted.len(), 1);
        assert_eq!(resolution.admitted[0].transition, a);
        assert_eq!(
            resolution.denied[0].1,
            Denial::Conflict {
                place: p,
                needed: 3.0,
                available: 1.0
            }
        );
    }

    #[test]
    fn priority_and_custom_orders() {
        let (net, p, a, b) = shared_place_net();
        let snapshot = net.initial_marking();
        let candidates = vec![needs(a, p, 3.0), needs(b, p, 3.0)];

        let by_priority = resolve(&net, &ConflictPolicy::Priority, &snapshot, candidates.clone());
        assert_eq!(by_priority.admitted[0].transition, b);

        let reversed = ConflictPolicy::custom(|x, y| y.name.cmp(&x.name));
        let by_custom = resolve(&net, &reversed, &snapshot, candidates);
        assert_eq!(by_custom.admitted[0].transition, b);
    }

    #[test]
    fn capacity_denies_overflowing_output() {
        let mut net = Net::empty();
        let src = net.add_place(Place::new("Src", 5.0)).unwrap();
        let sink = net
            .add_place(Place::new("Sink", 1.0).with_capacity(2.0))
            .unwrap();
        let t = net.add_transition(Transition::immediate("T")).unwrap();
        let u = net.add_transition(Transition::immediate("U")).unwrap();
        let fill = |transition| Candidate {
            transition,
            consume: smallvec![(src, 1.0)],
            produce: smallvec![(sink, 1.0)],
        };

        let resolution = resolve(
            &net,
            &ConflictPolicy::Identifier,
            &net.initial_marking(),
            vec![fill(t), fill(u)],
        );
        assert_eq!(resolution.admitted.len(), 1);
        assert!(matches!(
            resolution.denied[0].1,
            Denial::Capacity { capacity, .. } if capacity == 2.0
        ));
    }

    #[test]
    fn self_loops_do_not_count_against_capacity() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("P", 2.0).with_capacity(2.0)).unwrap();
        let t = net.add_transition(Transition::immediate("T")).unwrap();
        let candidate = Candidate {
            transition: t,
            consume: smallvec![(p, 1.0)],
            produce: smallvec![(p, 1.0)],
        };
        let resolution = resolve(
            &net,
            &ConflictPolicy::default(),
            &net.initial_marking(),
            vec![candidate],
        );
        assert!(resolution.denied.is_empty());
    }
}
