//! 四种时间语义各对应一个策略对象：判断“现在能否发射”以及“流量多少”。
use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;

use crate::engine::TIME_EPSILON;
use crate::engine::enablement::EnablementRecord;
use crate::expr::{Bindings, CompiledExpr, ExpressionError};
use crate::net::{ContinuousSpec, TransitionType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Readiness {
    Blocked,
    /// 已使能，但要到 `ready_at` 才能发生。
    Waiting { ready_at: f64 },
    /// `late` 为时间变迁超出发生窗口的时长。
    Ready { late: Option<f64> },
    Flowing,
}

/// 连续变迁截断后的瞬时速率。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRate {
    pub rate: f64,
    /// 求值为负并被置零时的原始值。
    pub negative: Option<f64>,
}

pub trait TransitionBehavior: fmt::Debug + Send + Sync {
    fn kind(&self) -> &'static str;

    /// 每次变迁转为使能时抽取的延迟。
    fn sample_delay(&self, _rng: &mut StdRng) -> Option<f64> {
        None
    }

    fn readiness(&self, record: &EnablementRecord, now: f64) -> Readiness;

    fn flow_rate(&self, _bindings: &dyn Bindings) -> Result<Option<FlowRate>, ExpressionError> {
        Ok(None)
    }
}

fn elapsed(record: &EnablementRecord, now: f64) -> Option<(f64, f64)> {
    if !record.is_enabled {
        return None;
    }
    record.enabled_since.map(|since| (since, now - since))
}

#[derive(Debug)]
pub struct Immediate;

impl TransitionBehavior for Immediate {
    fn kind(&self) -> &'static str {
        "immediate"
    }

    fn readiness(&self, record: &EnablementRecord, now: f64) -> Readiness {
        match elapsed(record, now) {
            Some(_) => Readiness::Ready { late: None },
            None => Readiness::Blocked,
        }
    }
}

#[derive(Debug)]
pub struct Timed {
    pub earliest: f64,
    pub latest: f64,
}

impl TransitionBehavior for Timed {
    fn kind(&self) -> &'static str {
        "timed"
    }

    fn readiness(&self, record: &EnablementRecord, now: f64) -> Readiness {
        let Some((since, elapsed)) = elapsed(record, now) else {
            return Readiness::Blocked;
        };
        if elapsed + TIME_EPSILON < self.earliest {
            Readiness::Waiting {
                ready_at: since + self.earliest,
            }
        } else if elapsed > self.latest + TIME_EPSILON {
            Readiness::Ready {
                late: Some(elapsed - self.latest),
            }
        } else {
            Readiness::Ready { late: None }
        }
    }
}

#[derive(Debug)]
pub struct Stochastic {
    pub rate: f64,
}

impl Stochastic {
    /// 按逆分布函数从 Exp(rate) 抽样。
    pub fn draw(rate: f64, rng: &mut StdRng) -> f64 {
        let u: f64 = rng.random();
        -(1.0 - u).ln() / rate
    }
}

impl TransitionBehavior for Stochastic {
    fn kind(&self) -> &'static str {
        "stochastic"
    }

    fn sample_delay(&self, rng: &mut StdRng) -> Option<f64> {
        Some(Self::draw(self.rate, rng))
    }

    fn readiness(&self, record: &EnablementRecord, now: f64) -> Readiness {
        let (Some((since, elapsed)), Some(delay)) = (elapsed(record, now), record.sampled_delay)
        else {
            return Readiness::Blocked;
        };
        if elapsed + TIME_EPSILON >= delay {
            Readiness::Ready { late: None }
        } else {
            Readiness::Waiting {
                ready_at: since + delay,
            }
        }
    }
}

#[derive(Debug)]
pub struct Continuous {
    pub rate_function: Option<CompiledExpr>,
    pub rate: f64,
    pub min_rate: Option<f64>,
    pub max_rate: Option<f64>,
}

impl Continuous {
    pub fn compile(spec: &ContinuousSpec) -> Result<Self, ExpressionError> {
        let rate_function = spec
            .rate_function
            .as_deref()
            .map(CompiledExpr::compile)
            .transpose()?;
        Ok(Self {
            rate_function,
            rate: spec.rate,
            min_rate: spec.min_rate,
            max_rate: spec.max_rate,
        })
    }
}

impl TransitionBehavior for Continuous {
    fn kind(&self) -> &'static str {
        "continuous"
    }

    fn readiness(&self, record: &EnablementRecord, now: f64) -> Readiness {
        match elapsed(record, now) {
            Some(_) => Readiness::Flowing,
            None => Readiness::Blocked,
        }
    }

    fn flow_rate(&self, bindings: &dyn Bindings) -> Result<Option<FlowRate>, ExpressionError> {
        let mut rate = match &self.rate_function {
            Some(function) => function.evaluate_number(bindings)?,
            None => self.rate,
        };
        if let Some(min) = self.min_rate {
            rate = rate.max(min);
        }
        if let Some(max) = self.max_rate {
            rate = rate.min(max);
        }
        if rate < 0.0 {
            return Ok(Some(FlowRate {
                rate: 0.0,
                negative: Some(rate),
            }));
        }
        Ok(Some(FlowRate {
            rate,
            negative: None,
        }))
    }
}

pub fn behavior_for(
    transition_type: &TransitionType,
) -> Result<Box<dyn TransitionBehavior>, ExpressionError> {
    Ok(match transition_type {
        TransitionType::Immediate => Box::new(Immediate),
        TransitionType::Timed { earliest, latest } => Box::new(Timed {
            earliest: *earliest,
            latest: *latest,
        }),
        TransitionType::Stochastic { rate } => Box::new(Stochastic { rate: *rate }),
        TransitionType::Continuous(spec) => Box::new(Continuous::compile(spec)?),
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::expr::NoBindings;

    fn enabled_at(since: f64) -> EnablementRecord {
        EnablementRecord {
            is_enabled: true,
            enabled_since: Some(since),
            sampled_delay: None,
        }
    }

    #[test]
    fn timed_window_is_inclusive_with_tolerance() {
        let timed = Timed {
            earliest: 1.0,
            latest: 2.0,
        };
        let record = enabled_at(0.0);
        assert_eq!(
            timed.readiness(&record, 0.9),
            Readiness::Waiting { ready_at: 1.0 }
        );
        assert_eq!(
            timed.readiness(&record, 1.0 - 1e-12),
            Readiness::Ready { late: None }
        );
        assert_eq!(timed.readiness(&record, 2.0), Readiness::Ready { late: None });
        match timed.readiness(&record, 2.5) {
            Readiness::Ready { late: Some(late) } => assert!((late - 0.5).abs() < 1e-12),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            timed.readiness(&EnablementRecord::default(), 5.0),
            Readiness::Blocked
        );
    }

    #[test]
    fn stochastic_waits_for_its_sampled_delay() {
        let behavior = Stochastic { rate: 2.0 };
        let mut rng = StdRng::seed_from_u64(7);
        let delay = behavior.sample_delay(&mut rng).unwrap();
        assert!(delay >= 0.0);

        let record = EnablementRecord {
            sampled_delay: Some(delay),
            ..enabled_at(1.0)
        };
        assert_eq!(
            behavior.readiness(&record, 1.0 + delay / 2.0),
            Readiness::Waiting {
                ready_at: 1.0 + delay
            }
        );
        assert_eq!(
            behavior.readiness(&record, 1.0 + delay),
            Readiness::Ready { late: None }
        );
    }

    #[test]
    fn exponential_draws_have_the_expected_mean() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = 20_000;
        let mean = (0..n).map(|_| Stochastic::draw(4.0, &mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 0.25).abs() < 0.02, "mean was {mean}");
    }

    #[test]
    fn continuous_rate_is_clamped_and_never_negative() {
        let clamped = Continuous::compile(&ContinuousSpec {
            rate_function: Some("10 * 3".into()),
            rate: 0.0,
            min_rate: None,
            max_rate: Some(5.0),
        })
        .unwrap();
        assert_eq!(
            clamped.flow_rate(&NoBindings).unwrap(),
            Some(FlowRate {
                rate: 5.0,
                negative: None
            })
        );

        let negative = Continuous::compile(&ContinuousSpec {
            rate_function: Some("0 - 2".into()),
            ..ContinuousSpec::default()
        })
        .unwrap();
        assert_eq!(
            negative.flow_rate(&NoBindings).unwrap(),
            Some(FlowRate {
                rate: 0.0,
                negative: Some(-2.0)
            })
        );

        let fallback = Continuous::compile(&ContinuousSpec {
            rate: 1.5,
            ..ContinuousSpec::default()
        })
        .unwrap();
        assert_eq!(fallback.flow_rate(&NoBindings).unwrap().map(|f| f.rate), Some(1.5));
    }

    #[test]
    fn factory_surfaces_rate_compile_errors() {
        let broken = TransitionType::continuous("k *");
        assert!(behavior_for(&broken).is_err());
        assert_eq!(behavior_for(&TransitionType::Immediate).unwrap().kind(), "immediate");
        assert!(Immediate.flow_rate(&NoBindings).unwrap().is_none());
    }
}
