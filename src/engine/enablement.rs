use indexmap::IndexMap;
use rand::rngs::StdRng;

use crate::engine::behavior::TransitionBehavior;
use crate::net::TransitionId;

/// 单个变迁的使能记录，不做持久化。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnablementRecord {
    pub is_enabled: bool,
    /// 仅在由不使能转为使能时设置；失去使能或发生后清空。
    pub enabled_since: Option<f64>,
    /// 同一时刻抽取的随机延迟，不会复用。
    pub sampled_delay: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablementChange {
    Unchanged,
    Enabled,
    Disabled,
}

#[derive(Debug, Default, Clone)]
pub struct EnablementTracker {
    records: IndexMap<TransitionId, EnablementRecord>,
}

impl EnablementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, transition: TransitionId) -> Option<&EnablementRecord> {
        self.records.get(&transition)
    }

    pub fn is_enabled(&self, transition: TransitionId) -> bool {
        self.records
            .get(&transition)
            .is_some_and(|record| record.is_enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TransitionId, &EnablementRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    /// 记录 `now` 时刻观察到的使能状态，并返回状态跳变（若有）。
    pub fn update(
        &mut self,
        transition: TransitionId,
        enabled: bool,
        now: f64,
        behavior: &dyn TransitionBehavior,
        rng: &mut StdRng,
    ) -> EnablementChange {
        let record = self.records.entry(transition).or_default();
        match (record.is_enabled, enabled) {
            (false, true) => {
                record.is_enabled = true;
                record.enabled_since = Some(now);
                record.sampled_delay = behavior.sample_delay(rng);
                log::trace!("{} enabled at t={}", transition, now);
                EnablementChange::Enabled
            }
            (true, false) => {
                *record = EnablementRecord::default();
                EnablementChange::Disabled
            }
            _ => EnablementChange::Unchanged,
        }
    }

    /// 记录一次不使能的观察；此跳变无需变迁行为参与。
    pub fn disable(&mut self, transition: TransitionId) -> EnablementChange {
        let record = self.records.entry(transition).or_default();
        if record.is_enabled {
            *record = EnablementRecord::default();
            EnablementChange::Disabled
        } else {
            EnablementChange::Unchanged
        }
    }

    /// 变迁发生后清空记录，下一次使能重新开始计时。
    pub fn mark_fired(&mut self, transition: TransitionId) {
        if let Some(record) = self.records.get_mut(&transition) {
            *record = EnablementRecord::default();
        }
    }

    pub fn purge(&mut self, transition: TransitionId) -> Option<EnablementRecord> {
        self.records.shift_remove(&transition)
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::engine::behavior::{Immediate, Stochastic};

    #[test]
    fn edges_set_and_clear_enabled_since() {
        let mut tracker = EnablementTracker::new();
        let mut rng = StdRng::seed_from_u64(0);
        let t = TransitionId::new(0);

        assert_eq!(
            tracker.update(t, true, 0.5, &Immediate, &mut rng),
            EnablementChange::Enabled
        );
        assert_eq!(
            tracker.update(t, true, 0.6, &Immediate, &mut rng),
            EnablementChange::Unchanged
        );
        assert_eq!(tracker.record(t).unwrap().enabled_since, Some(0.5));

        assert_eq!(
            tracker.update(t, false, 0.7, &Immediate, &mut rng),
            EnablementChange::Disabled
        );
        assert_eq!(tracker.record(t), Some(&EnablementRecord::default()));
    }

    #[test]
    fn every_enablement_draws_a_new_delay() {
        let mut tracker = EnablementTracker::new();
        let mut rng = StdRng::seed_from_u64(3);
        let behavior = Stochastic { rate: 1.0 };
        let t = TransitionId::new(4);

        tracker.update(t, true, 0.0, &behavior, &mut rng);
        let first = tracker.record(t).unwrap().sampled_delay.unwrap();
        tracker.mark_fired(t);
        assert!(!tracker.is_enabled(t));

        tracker.update(t, true, 1.0, &behavior, &mut rng);
        let second = tracker.record(t).unwrap().sampled_delay.unwrap();
        assert_ne!(first, second);
        assert_eq!(tracker.record(t).unwrap().enabled_since, Some(1.0));

        assert!(tracker.purge(t).is_some());
        assert!(tracker.is_empty());
    }
}
