//! 表达式可调用的内建函数白名单。名字不在表中的调用在编译期即被拒绝。
use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::expr::ExpressionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Abs,
    Min,
    Max,
    Exp,
    Ln,
    Log,
    Log10,
    Sqrt,
    Pow,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Clamp,
    Sigmoid,
    Hill,
    MichaelisMenten,
    MassAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&count),
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(lo, hi) => write!(f, "{} to {}", lo, hi),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

const ALL: [Builtin; 20] = [
    Builtin::Abs,
    Builtin::Min,
    Builtin::Max,
    Builtin::Exp,
    Builtin::Ln,
    Builtin::Log,
    Builtin::Log10,
    Builtin::Sqrt,
    Builtin::Pow,
    Builtin::Sin,
    Builtin::Cos,
    Builtin::Tan,
    Builtin::Floor,
    Builtin::Ceil,
    Builtin::Round,
    Builtin::Clamp,
    Builtin::Sigmoid,
    Builtin::Hill,
    Builtin::MichaelisMenten,
    Builtin::MassAction,
];

static REGISTRY: Lazy<IndexMap<&'static str, Builtin>> =
    Lazy::new(|| ALL.iter().map(|builtin| (builtin.name(), *builtin)).collect());

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        REGISTRY.get(name).copied()
    }

    /// 按注册顺序列出全部函数名。
    pub fn names() -> impl Iterator<Item = &'static str> {
        REGISTRY.keys().copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Exp => "exp",
            Builtin::Ln => "ln",
            Builtin::Log => "log",
            Builtin::Log10 => "log10",
            Builtin::Sqrt => "sqrt",
            Builtin::Pow => "pow",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Clamp => "clamp",
            Builtin::Sigmoid => "sigmoid",
            Builtin::Hill => "hill",
            Builtin::MichaelisMenten => "michaelis_menten",
            Builtin::MassAction => "mass_action",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Builtin::Min | Builtin::Max | Builtin::MassAction => Arity::AtLeast(1),
            Builtin::Log => Arity::Range(1, 2),
            Builtin::Pow => Arity::Exact(2),
            Builtin::Clamp | Builtin::Sigmoid | Builtin::Hill | Builtin::MichaelisMenten => {
                Arity::Exact(3)
            }
            _ => Arity::Exact(1),
        }
    }

    /// 参数个数已在编译期检查，`args` 必然符合。
    pub fn apply(self, args: &[f64]) -> Result<f64, ExpressionError> {
        let x = args.first().copied().unwrap_or_default();
        let arg = |i: usize| args.get(i).copied().unwrap_or_default();
        let result = match self {
            Builtin::Abs => x.abs(),
            Builtin::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Builtin::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Builtin::Exp => x.exp(),
            Builtin::Ln => x.ln(),
            Builtin::Log if args.len() == 2 => {
                let base = arg(1).ln();
                if base == 0.0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                x.ln() / base
            }
            Builtin::Log => x.ln(),
            Builtin::Log10 => x.log10(),
            Builtin::Sqrt => x.sqrt(),
            Builtin::Pow => x.powf(arg(1)),
            Builtin::Sin => x.sin(),
            Builtin::Cos => x.cos(),
            Builtin::Tan => x.tan(),
            Builtin::Floor => x.floor(),
            Builtin::Ceil => x.ceil(),
            Builtin::Round => x.round_ties_even(),
            Builtin::Clamp => {
                let (lo, hi) = (arg(1), arg(2));
                if lo > hi {
                    return Err(ExpressionError::InvalidArgument {
                        function: self.name(),
                        reason: "lower bound exceeds upper bound",
                    });
                }
                x.max(lo).min(hi)
            }
            Builtin::Sigmoid => {
                let (midpoint, steepness) = (arg(1), arg(2));
                1.0 / (1.0 + (-steepness * (x - midpoint)).exp())
            }
            Builtin::Hill => {
                let (k, n) = (arg(1), arg(2));
                let xn = x.powf(n);
                let denominator = k.powf(n) + xn;
                if denominator == 0.0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                xn / denominator
            }
            Builtin::MichaelisMenten => {
                let (vmax, km) = (arg(1), arg(2));
                let denominator = km + x;
                if denominator == 0.0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                vmax * x / denominator
            }
            Builtin::MassAction => args.iter().skip(1).fold(x, |acc, v| acc * v),
        };
        if result.is_finite() {
            Ok(result)
        } else {
            Err(ExpressionError::NonFinite {
                operation: self.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_every_builtin_by_name() {
        for builtin in ALL {
            assert_eq!(Builtin::lookup(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::lookup("system"), None);
        assert_eq!(Builtin::names().count(), ALL.len());
    }

    #[test]
    fn kinetic_laws_match_closed_forms() {
        assert_eq!(Builtin::Sigmoid.apply(&[5.0, 5.0, 2.0]).unwrap(), 0.5);
        assert_eq!(Builtin::Hill.apply(&[2.0, 2.0, 3.0]).unwrap(), 0.5);
        assert_eq!(
            Builtin::MichaelisMenten.apply(&[1.0, 10.0, 1.0]).unwrap(),
            5.0
        );
        assert_eq!(Builtin::MassAction.apply(&[0.5, 2.0, 3.0]).unwrap(), 3.0);
    }

    #[test]
    fn degenerate_arguments_fail_instead_of_panicking() {
        assert_eq!(
            Builtin::MichaelisMenten.apply(&[0.0, 1.0, 0.0]),
            Err(ExpressionError::DivisionByZero)
        );
        assert_eq!(
            Builtin::Hill.apply(&[0.0, 0.0, 2.0]),
            Err(ExpressionError::DivisionByZero)
        );
        assert!(matches!(
            Builtin::Clamp.apply(&[1.0, 3.0, 2.0]),
            Err(ExpressionError::InvalidArgument { .. })
        ));
        assert_eq!(
            Builtin::Sqrt.apply(&[-1.0]),
            Err(ExpressionError::NonFinite { operation: "sqrt" })
        );
        assert_eq!(
            Builtin::Log.apply(&[8.0, 1.0]),
            Err(ExpressionError::DivisionByZero)
        );
    }

    #[test]
    fn arity_describes_accepted_counts() {
        assert!(Builtin::Log.arity().accepts(2));
        assert!(!Builtin::Log.arity().accepts(3));
        assert!(Builtin::Max.arity().accepts(5));
        assert_eq!(Builtin::Hill.arity().to_string(), "3");
        assert_eq!(Builtin::Min.arity().to_string(), "at least 1");
    }
}
