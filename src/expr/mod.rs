//! # 受限表达式语言
//!
//! 守卫、速率函数与弧阈值都用同一套小型表达式书写，编译后缓存复用。
//! 只允许数值/布尔字面量、变量、算术、比较、逻辑运算以及 [`Builtin`] 白名单中的函数；
//! 属性访问、下标、`import`/`lambda`/`eval` 以及双下划线名字在编译期即被拒绝。
//! 源码长度与嵌套层数有上限（[`MAX_SOURCE_LEN`]、[`MAX_NESTING`]），求值递归深度随之有界。
//!
//! 变量按 [`Bindings`] 解析，未命中时再回落到常量 `pi` 与 `e`。
//!
//! ```rust
//! use hybrid_pn::expr::CompiledExpr;
//! use indexmap::IndexMap;
//!
//! let rate = CompiledExpr::compile("michaelis_menten(S, vmax, km)").unwrap();
//! let mut scope = IndexMap::new();
//! scope.insert("S".to_string(), 10.0);
//! scope.insert("vmax".to_string(), 1.0);
//! scope.insert("km".to_string(), 10.0);
//! assert_eq!(rate.evaluate_number(&scope).unwrap(), 0.5);
//! ```
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;

use indexmap::IndexMap;
use thiserror::Error;

pub mod ast;
pub mod builtins;
mod eval;
mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use builtins::{Arity, Builtin};
pub use parser::{MAX_NESTING, MAX_SOURCE_LEN};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,
    #[error("syntax error at offset {offset} in `{expression}`")]
    Syntax { expression: String, offset: usize },
    #[error("`{0}` is not allowed in expressions")]
    Forbidden(String),
    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("expression is {length} bytes long, at most {limit} are accepted")]
    TooLong { length: usize, limit: usize },
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("`{function}` takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: Arity,
        found: usize,
    },
    #[error("`{function}`: {reason}")]
    InvalidArgument {
        function: &'static str,
        reason: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("`{operation}` produced a non-finite value")]
    NonFinite { operation: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
        }
    }

    pub fn as_number(self) -> Result<f64, ExpressionError> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(ExpressionError::TypeMismatch {
                expected: "number",
                found: "bool",
            }),
        }
    }

    pub fn as_bool(self) -> Result<bool, ExpressionError> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Number(_) => Err(ExpressionError::TypeMismatch {
                expected: "bool",
                found: "number",
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// 自由变量的名字解析。
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl<S: BuildHasher> Bindings for HashMap<String, f64, S> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).copied().map(Value::Number)
    }
}

impl Bindings for IndexMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).copied().map(Value::Number)
    }
}

impl<B: Bindings + ?Sized> Bindings for &B {
    fn lookup(&self, name: &str) -> Option<Value> {
        (**self).lookup(name)
    }
}

/// 不绑定任何名字，只能解析 `pi` 与 `e`。
pub struct NoBindings;

impl Bindings for NoBindings {
    fn lookup(&self, _name: &str) -> Option<Value> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.ast.identifiers()
    }

    pub fn evaluate(&self, bindings: &dyn Bindings) -> Result<Value, ExpressionError> {
        eval::evaluate(&self.ast, bindings)
    }

    pub fn evaluate_number(&self, bindings: &dyn Bindings) -> Result<f64, ExpressionError> {
        self.evaluate(bindings)?.as_number()
    }

    pub fn evaluate_bool(&self, bindings: &dyn Bindings) -> Result<bool, ExpressionError> {
        self.evaluate(bindings)?.as_bool()
    }
}

impl FromStr for CompiledExpr {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn number(source: &str, bindings: &dyn Bindings) -> Result<f64, ExpressionError> {
        CompiledExpr::compile(source)?.evaluate_number(bindings)
    }

    #[test]
    fn arithmetic_and_constants() {
        assert_eq!(number("1 + 2 * 3", &NoBindings), Ok(7.0));
        assert_eq!(number("2 ** 10", &NoBindings), Ok(1024.0));
        assert_eq!(number("-7 % 3", &NoBindings), Ok(2.0));
        assert_eq!(number("pi", &NoBindings), Ok(std::f64::consts::PI));
        let ln_e = number("ln(e)", &NoBindings).unwrap();
        assert!((ln_e - 1.0).abs() < 1e-12);
    }

    #[test]
    fn variables_resolve_through_bindings() {
        let vars = scope(&[("S", 4.0), ("k", 0.5), ("t", 2.0)]);
        assert_eq!(number("k * S + t", &vars), Ok(4.0));
        assert_eq!(
            number("missing + 1", &vars),
            Err(ExpressionError::UnknownIdentifier("missing".into()))
        );
    }

    #[test]
    fn guards_evaluate_to_booleans() {
        let vars = scope(&[("S", 4.0)]);
        let guard = CompiledExpr::compile("S > 2 and not S >= 10").unwrap();
        assert_eq!(guard.evaluate_bool(&vars), Ok(true));
        let chained = CompiledExpr::compile("0 < S < 3").unwrap();
        assert_eq!(chained.evaluate_bool(&vars), Ok(false));
    }

    #[test]
    fn boolean_operators_short_circuit() {
        let guard = CompiledExpr::compile("false and missing > 0").unwrap();
        assert_eq!(guard.evaluate_bool(&NoBindings), Ok(false));
        let guard = CompiledExpr::compile("true || missing > 0").unwrap();
        assert_eq!(guard.evaluate_bool(&NoBindings), Ok(true));
    }

    #[test]
    fn type_errors_are_reported() {
        let expr = CompiledExpr::compile("1 + (2 > 1)").unwrap();
        assert_eq!(
            expr.evaluate(&NoBindings),
            Err(ExpressionError::TypeMismatch {
                expected: "number",
                found: "bool"
            })
        );
        let expr = CompiledExpr::compile("1 + 1").unwrap();
        assert!(expr.evaluate_bool(&NoBindings).is_err());
    }

    #[test]
    fn runtime_faults_do_not_panic() {
        assert_eq!(number("1 / 0", &NoBindings), Err(ExpressionError::DivisionByZero));
        assert_eq!(number("5 % 0", &NoBindings), Err(ExpressionError::DivisionByZero));
        assert_eq!(
            number("exp(1000)", &NoBindings),
            Err(ExpressionError::NonFinite { operation: "exp" })
        );
        assert_eq!(
            number("10 ** 400", &NoBindings),
            Err(ExpressionError::NonFinite { operation: "**" })
        );
    }

    #[test]
    fn identifiers_are_listed_once_in_order() {
        let expr: CompiledExpr = "hill(S, K, n) * S + K".parse().unwrap();
        assert_eq!(expr.identifiers(), vec!["S", "K", "n"]);
        assert_eq!(expr.to_string(), "hill(S, K, n) * S + K");
    }

    #[test]
    fn display_round_trips_through_the_parser() {
        let expr = CompiledExpr::compile("-a ** 2 + b / (c - 1) > 0 or not d").unwrap();
        let reparsed = CompiledExpr::compile(&expr.ast().to_string()).unwrap();
        assert_eq!(expr.ast(), reparsed.ast());
    }
}
