//! 连续流积分：每个连续迁移本步移动 `rate × dt`，按弧权重缩放。
//! 多个连续迁移共享输入库所时按比例缩减，保证不透支；输出受容量余量限制。
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::net::{Marking, Net, PlaceId, Tokens, TransitionId};

/// 单个连续变迁在本步请求的流量。
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDemand {
    pub transition: TransitionId,
    pub rate: f64,
    pub inputs: SmallVec<[(PlaceId, Tokens); 4]>,
    pub outputs: SmallVec<[(PlaceId, Tokens); 4]>,
}

/// 实际施加的流量；`amount` 未乘弧权重。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuousFlow {
    pub transition: TransitionId,
    pub rate: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityCap {
    pub transition: TransitionId,
    pub place: PlaceId,
    pub capacity: Tokens,
    pub attempted: Tokens,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlowOutcome {
    pub flows: Vec<ContinuousFlow>,
    pub capped: Vec<CapacityCap>,
}

/// 按 `marking` 的可供量与剩余容量缩放 `demands`，再施加到标识上。
pub fn integrate(net: &Net, marking: &mut Marking, demands: &[FlowDemand], dt: f64) -> FlowOutcome {
    let requested: Vec<f64> = demands.iter().map(|d| d.rate * dt).collect();
    let mut scale = vec![1.0_f64; demands.len()];

    let drawn = totals(demands, &requested, |d| &d.inputs);
    for (place, total) in drawn {
        let available = marking.tokens(place);
        if total <= available || total <= 0.0 {
            continue;
        }
        let share = available / total;
        for (i, demand) in demands.iter().enumerate() {
            if demand.inputs.iter().any(|(p, _)| *p == place) {
                scale[i] = scale[i].min(share);
            }
        }
    }

    let mut outcome = FlowOutcome::default();
    let scaled: Vec<f64> = requested.iter().zip(&scale).map(|(q, s)| q * s).collect();
    let added = totals(demands, &scaled, |d| &d.outputs);
    for (place, total) in added {
        let Some(capacity) = net.place(place).and_then(|p| p.capacity) else {
            continue;
        };
        let headroom = (capacity - marking.tokens(place)).max(0.0);
        if total <= headroom || total <= 0.0 {
            continue;
        }
        let share = headroom / total;
        for (i, demand) in demands.iter().enumerate() {
            if demand.outputs.iter().any(|(p, _)| *p == place) {
                scale[i] *= share;
                outcome.capped.push(CapacityCap {
                    transition: demand.transition,
                    place,
                    capacity,
                    attempted: marking.tokens(place) + total,
                });
            }
        }
    }

    for (i, demand) in demands.iter().enumerate() {
        let amount = requested[i] * scale[i];
        for &(place, weight) in &demand.inputs {
            let tokens = marking.tokens_mut(place);
            *tokens = (*tokens - amount * weight).max(0.0);
        }
        for &(place, weight) in &demand.outputs {
            let capacity = net.place(place).and_then(|p| p.capacity);
            let tokens = marking.tokens_mut(place);
            *tokens += amount * weight;
            if let Some(capacity) = capacity {
                *tokens = tokens.min(capacity);
            }
        }
        outcome.flows.push(ContinuousFlow {
            transition: demand.transition,
            rate: demand.rate,
            amount,
        });
    }
    outcome
}

fn totals<'a>(
    demands: &'a [FlowDemand],
    amounts: &[f64],
    arcs: impl Fn(&'a FlowDemand) -> &'a SmallVec<[(PlaceId, Tokens); 4]>,
) -> IndexMap<PlaceId, f64> {
    let mut totals = IndexMap::new();
    for (demand, amount) in demands.iter().zip(amounts) {
        for &(place, weight) in arcs(demand) {
            *totals.entry(place).or_insert(0.0) += amount * weight;
        }
    }
    totals
}
