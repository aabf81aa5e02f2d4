use smallvec::SmallVec;

use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::{Bindings, ExpressionError, Value};

pub(crate) fn evaluate(expr: &Expr, bindings: &dyn Bindings) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Variable(name) => resolve(name, bindings),
        Expr::Unary(UnaryOp::Neg, operand) => {
            Ok(Value::Number(-evaluate(operand, bindings)?.as_number()?))
        }
        Expr::Unary(UnaryOp::Not, operand) => {
            Ok(Value::Bool(!evaluate(operand, bindings)?.as_bool()?))
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !evaluate(lhs, bindings)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate(rhs, bindings)?.as_bool()?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if evaluate(lhs, bindings)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate(rhs, bindings)?.as_bool()?))
        }
        Expr::Binary(op @ (BinaryOp::Eq | BinaryOp::Ne), lhs, rhs) => {
            let equal = match (evaluate(lhs, bindings)?, evaluate(rhs, bindings)?) {
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (a, b) => {
                    return Err(ExpressionError::TypeMismatch {
                        expected: a.type_name(),
                        found: b.type_name(),
                    });
                }
            };
            Ok(Value::Bool(equal == (*op == BinaryOp::Eq)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = evaluate(lhs, bindings)?.as_number()?;
            let b = evaluate(rhs, bindings)?.as_number()?;
            arithmetic(*op, a, b)
        }
        Expr::Call(builtin, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, bindings)?.as_number())
                .collect::<Result<SmallVec<[f64; 4]>, _>>()?;
            builtin.apply(&values).map(Value::Number)
        }
    }
}

fn resolve(name: &str, bindings: &dyn Bindings) -> Result<Value, ExpressionError> {
    if let Some(value) = bindings.lookup(name) {
        return Ok(value);
    }
    match name {
        "pi" => Ok(Value::Number(std::f64::consts::PI)),
        "e" => Ok(Value::Number(std::f64::consts::E)),
        _ => Err(ExpressionError::UnknownIdentifier(name.to_string())),
    }
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value, ExpressionError> {
    let number = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => a / b,
        // remainder takes the sign of the divisor
        BinaryOp::Rem => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Lt => return Ok(Value::Bool(a < b)),
        BinaryOp::Le => return Ok(Value::Bool(a <= b)),
        BinaryOp::Gt => return Ok(Value::Bool(a > b)),
        BinaryOp::Ge => return Ok(Value::Bool(a >= b)),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => {
            unreachable!("handled before arithmetic dispatch")
        }
    };
    if number.is_finite() {
        Ok(Value::Number(number))
    } else {
        Err(ExpressionError::NonFinite {
            operation: op.symbol(),
        })
    }
}
