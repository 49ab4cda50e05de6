//! Binary operator semantics for the arithmetic, comparison, and
//! concatenation operators.
//!
//! `&&`, `||`, `??`, `|>`, `==`, and `!=` live in the evaluator: they
//! short-circuit or need evaluator services (deep equality, function
//! application).

use std::{cmp::Ordering, rc::Rc};

use crate::{
    cst::BinaryOp,
    error::{EvalError, EvalResult},
    types::{DataSize, Duration},
    value::Value,
};

/// Applies a strict (both-operands-evaluated) binary operator.
pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => sub(left, right),
        BinaryOp::Mul => mul(left, right),
        BinaryOp::Div => div(left, right),
        BinaryOp::IntDiv => int_div(left, right),
        BinaryOp::Mod => modulo(left, right),
        BinaryOp::Pow => pow(left, right),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => compare(op, left, right),
        _ => Err(EvalError::type_error(format!(
            "Operator `{op}` is not a strict binary operator."
        ))),
    }
}

fn type_mismatch(op: BinaryOp, left: &Value, right: &Value) -> Box<EvalError> {
    EvalError::type_error(format!(
        "Operator `{op}` is not defined for operands of type `{}` and `{}`.",
        left.type_name(),
        right.type_name()
    ))
}

fn overflow(op: BinaryOp, left: i64, right: i64) -> Box<EvalError> {
    EvalError::arithmetic(format!("Integer overflow computing `{left} {op} {right}`."))
}

fn add(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| overflow(BinaryOp::Add, *a, *b)),
        (a, b) if is_numeric_pair(a, b) => Ok(Value::Float(as_f64(a) + as_f64(b))),
        (Value::Str(a), Value::Str(b)) => {
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Ok(Value::string(out))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend(a.iter().cloned());
            out.extend(b.iter().cloned());
            Ok(Value::List(Rc::new(out)))
        }
        (Value::Duration(a), Value::Duration(b)) => {
            let sum = a.in_seconds() + b.in_seconds();
            Ok(Value::Duration(Duration::new(sum / a.unit.in_seconds(), a.unit)))
        }
        (Value::DataSize(a), Value::DataSize(b)) => {
            let sum = a.in_bytes() + b.in_bytes();
            Ok(Value::DataSize(DataSize::new(sum / a.unit.in_bytes(), a.unit)))
        }
        _ => Err(type_mismatch(BinaryOp::Add, left, right)),
    }
}

fn sub(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_sub(*b)
            .map(Value::Int)
            .ok_or_else(|| overflow(BinaryOp::Sub, *a, *b)),
        (a, b) if is_numeric_pair(a, b) => Ok(Value::Float(as_f64(a) - as_f64(b))),
        (Value::Duration(a), Value::Duration(b)) => {
            let diff = a.in_seconds() - b.in_seconds();
            Ok(Value::Duration(Duration::new(diff / a.unit.in_seconds(), a.unit)))
        }
        (Value::DataSize(a), Value::DataSize(b)) => {
            let diff = a.in_bytes() - b.in_bytes();
            Ok(Value::DataSize(DataSize::new(diff / a.unit.in_bytes(), a.unit)))
        }
        _ => Err(type_mismatch(BinaryOp::Sub, left, right)),
    }
}

fn mul(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_mul(*b)
            .map(Value::Int)
            .ok_or_else(|| overflow(BinaryOp::Mul, *a, *b)),
        (a, b) if is_numeric_pair(a, b) => Ok(Value::Float(as_f64(a) * as_f64(b))),
        (Value::Duration(d), n) | (n, Value::Duration(d)) if is_number(n) => {
            Ok(Value::Duration(Duration::new(d.value * as_f64(n), d.unit)))
        }
        (Value::DataSize(d), n) | (n, Value::DataSize(d)) if is_number(n) => {
            Ok(Value::DataSize(DataSize::new(d.value * as_f64(n), d.unit)))
        }
        _ => Err(type_mismatch(BinaryOp::Mul, left, right)),
    }
}

fn div(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(EvalError::arithmetic("Division by zero."));
            }
            a.checked_div(*b)
                .map(Value::Int)
                .ok_or_else(|| overflow(BinaryOp::Div, *a, *b))
        }
        (a, b) if is_numeric_pair(a, b) => Ok(Value::Float(as_f64(a) / as_f64(b))),
        (Value::Duration(d), n) if is_number(n) => Ok(Value::Duration(Duration::new(d.value / as_f64(n), d.unit))),
        (Value::Duration(a), Value::Duration(b)) => Ok(Value::Float(a.in_seconds() / b.in_seconds())),
        (Value::DataSize(d), n) if is_number(n) => Ok(Value::DataSize(DataSize::new(d.value / as_f64(n), d.unit))),
        (Value::DataSize(a), Value::DataSize(b)) => Ok(Value::Float(a.in_bytes() / b.in_bytes())),
        _ => Err(type_mismatch(BinaryOp::Div, left, right)),
    }
}

fn int_div(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(EvalError::arithmetic("Division by zero."));
            }
            a.checked_div(*b)
                .map(Value::Int)
                .ok_or_else(|| overflow(BinaryOp::IntDiv, *a, *b))
        }
        (a, b) if is_numeric_pair(a, b) => {
            let result = (as_f64(a) / as_f64(b)).trunc();
            if result.is_finite() && result.abs() < 9.0e18 {
                #[expect(clippy::cast_possible_truncation, reason = "range checked above")]
                let truncated = result as i64;
                Ok(Value::Int(truncated))
            } else {
                Err(EvalError::arithmetic(format!(
                    "Cannot truncate `{result}` to an Int."
                )))
            }
        }
        _ => Err(type_mismatch(BinaryOp::IntDiv, left, right)),
    }
}

/// Euclidean-style remainder carrying the sign of the divisor.
fn modulo(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(EvalError::arithmetic("Division by zero."));
            }
            let mut r = a.checked_rem(*b).ok_or_else(|| overflow(BinaryOp::Mod, *a, *b))?;
            if r != 0 && (r < 0) != (*b < 0) {
                r += b;
            }
            Ok(Value::Int(r))
        }
        (a, b) if is_numeric_pair(a, b) => {
            let (a, b) = (as_f64(a), as_f64(b));
            Ok(Value::Float(a - b * (a / b).floor()))
        }
        _ => Err(type_mismatch(BinaryOp::Mod, left, right)),
    }
}

fn pow(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b >= 0 {
                let exp = u32::try_from(*b).map_err(|_| overflow(BinaryOp::Pow, *a, *b))?;
                a.checked_pow(exp)
                    .map(Value::Int)
                    .ok_or_else(|| overflow(BinaryOp::Pow, *a, *b))
            } else {
                Ok(Value::Float((*a as f64).powi(i32::try_from(*b).unwrap_or(i32::MIN))))
            }
        }
        (a, b) if is_numeric_pair(a, b) => Ok(Value::Float(as_f64(a).powf(as_f64(b)))),
        _ => Err(type_mismatch(BinaryOp::Pow, left, right)),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let ordering = match (left, right) {
        (a, b) if is_numeric_pair(a, b) => as_f64(a).partial_cmp(&as_f64(b)),
        // Rust's `str` ordering is byte order, which for UTF-8 equals
        // code-point order.
        (Value::Str(a), Value::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
        (Value::Duration(a), Value::Duration(b)) => a.partial_cmp(b),
        (Value::DataSize(a), Value::DataSize(b)) => a.partial_cmp(b),
        _ => return Err(type_mismatch(op, left, right)),
    };
    let result = match (op, ordering) {
        // NaN comparisons are false across the board.
        (_, None) => false,
        (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
        (BinaryOp::Lte, Some(o)) => o != Ordering::Greater,
        (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
        (BinaryOp::Gte, Some(o)) => o != Ordering::Less,
        _ => unreachable!("compare is called for comparison operators only"),
    };
    Ok(Value::Bool(result))
}

fn is_number(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

/// At least one float, both numbers: the mixed/float path.
fn is_numeric_pair(a: &Value, b: &Value) -> bool {
    is_number(a) && is_number(b)
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => unreachable!("as_f64 is called on numbers only"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    #[test]
    fn integer_overflow_raises() {
        for op in [BinaryOp::Add, BinaryOp::Mul, BinaryOp::Pow] {
            let err = binary(op, &int(i64::MAX), &int(2)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Arithmetic, "{op}");
        }
        let err = binary(BinaryOp::Sub, &int(i64::MIN), &int(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }

    #[test]
    fn integer_division_truncates_toward_zero() {
        assert_eq!(binary(BinaryOp::Div, &int(7), &int(2)).unwrap(), int(3));
        assert_eq!(binary(BinaryOp::Div, &int(-7), &int(2)).unwrap(), int(-3));
        let err = binary(BinaryOp::Div, &int(1), &int(0)).unwrap_err();
        assert!(err.message().contains("Division by zero"));
    }

    #[test]
    fn modulo_takes_the_sign_of_the_divisor() {
        assert_eq!(binary(BinaryOp::Mod, &int(7), &int(3)).unwrap(), int(1));
        assert_eq!(binary(BinaryOp::Mod, &int(-7), &int(3)).unwrap(), int(2));
        assert_eq!(binary(BinaryOp::Mod, &int(7), &int(-3)).unwrap(), int(-2));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(binary(BinaryOp::Add, &int(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn float_follows_ieee_754() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(binary(BinaryOp::Lt, &nan, &Value::Float(1.0)).unwrap(), Value::Bool(false));
        assert_eq!(
            binary(BinaryOp::Div, &Value::Float(1.0), &Value::Float(0.0)).unwrap(),
            Value::Float(f64::INFINITY)
        );
        // +0.0 == -0.0 via Value equality.
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn duration_arithmetic_normalizes_units() {
        use crate::types::DurationUnit;
        let a = Value::Duration(Duration::new(1.0, DurationUnit::Minutes));
        let b = Value::Duration(Duration::new(30.0, DurationUnit::Seconds));
        let sum = binary(BinaryOp::Add, &a, &b).unwrap();
        match sum {
            Value::Duration(d) => {
                assert_eq!(d.unit, DurationUnit::Minutes);
                assert!((d.value - 1.5).abs() < 1e-12);
            }
            other => panic!("expected duration, got {other:?}"),
        }
    }

    #[test]
    fn string_comparison_is_code_point_order() {
        let a = Value::string("a");
        let b = Value::string("é");
        assert_eq!(binary(BinaryOp::Lt, &a, &b).unwrap(), Value::Bool(true));
    }
}
