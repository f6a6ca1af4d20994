// src/runtime/ops.rs
//! Operator semantics shared by the interpreter and the bytecode VM

use crate::parser::ast::{ArithmeticOp, ComparisonOp};
use crate::{EvaluationError, Value};
use std::cmp::Ordering;

/// `Long op Long` stays integral (wrapping); any `Double` operand promotes
/// the operation to floating point.
pub fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::Long(l), Value::Long(r)) => long_arithmetic(op, *l, *r).map(Value::Long),
        _ => {
            let l = numeric(left, op)?;
            let r = numeric(right, op)?;
            let result = match op {
                ArithmeticOp::Add => l + r,
                ArithmeticOp::Sub => l - r,
                ArithmeticOp::Mul => l * r,
                ArithmeticOp::Div => l / r,
                ArithmeticOp::Rem => l % r,
            };
            Ok(Value::Double(result))
        }
    }
}

fn long_arithmetic(op: ArithmeticOp, l: i64, r: i64) -> Result<i64, EvaluationError> {
    match op {
        ArithmeticOp::Add => Ok(l.wrapping_add(r)),
        ArithmeticOp::Sub => Ok(l.wrapping_sub(r)),
        ArithmeticOp::Mul => Ok(l.wrapping_mul(r)),
        ArithmeticOp::Div if r == 0 => Err(EvaluationError::DivisionByZero),
        ArithmeticOp::Div => Ok(l.wrapping_div(r)),
        ArithmeticOp::Rem if r == 0 => Err(EvaluationError::DivisionByZero),
        ArithmeticOp::Rem => Ok(l.wrapping_rem(r)),
    }
}

fn numeric(value: &Value, op: ArithmeticOp) -> Result<f64, EvaluationError> {
    value.as_double().ok_or_else(|| EvaluationError::TypeMismatch {
        operation: format!("operator {}", op.symbol()),
        found: value.kind().to_string(),
    })
}

/// Values of different kinds are never equal and never ordered; relational
/// operators on them yield `false`.
pub fn compare(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    match op {
        ComparisonOp::Eq => equals(left, right),
        ComparisonOp::Ne => !equals(left, right),
        ComparisonOp::Lt => ordering(left, right) == Some(Ordering::Less),
        ComparisonOp::Lte => matches!(
            ordering(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ComparisonOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        ComparisonOp::Gte => matches!(
            ordering(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Long(l), Value::Double(r)) | (Value::Double(r), Value::Long(l)) => {
            (*l as f64) == *r
        }
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Long(l), Value::Long(r)) => Some(l.cmp(r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ if left.is_numeric() && right.is_numeric() => {
            left.as_double()?.partial_cmp(&right.as_double()?)
        }
        _ => None,
    }
}

pub fn negate(value: &Value) -> Result<Value, EvaluationError> {
    match value {
        Value::Long(n) => Ok(Value::Long(n.wrapping_neg())),
        Value::Double(f) => Ok(Value::Double(-f)),
        other => Err(EvaluationError::TypeMismatch {
            operation: "unary minus".to_string(),
            found: other.kind().to_string(),
        }),
    }
}

/// `Null` for out-of-range positions, absent keys and non-indexable targets
pub fn index(object: &Value, index: &Value) -> Value {
    let found = match (object, index) {
        (Value::List(items), Value::Long(idx)) => usize::try_from(*idx)
            .ok()
            .and_then(|idx| items.get(idx)),
        (Value::Map(map), Value::String(key)) => map.get(key),
        _ => None,
    };
    found.cloned().unwrap_or(Value::Null)
}

pub fn field(object: &Value, name: &str) -> Value {
    object
        .as_map()
        .and_then(|map| map.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Boolean view of a value that must be Boolean
pub fn truthy(value: &Value, operation: &str) -> Result<bool, EvaluationError> {
    value.as_bool().ok_or_else(|| EvaluationError::TypeMismatch {
        operation: operation.to_string(),
        found: value.kind().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_tower() {
        assert_eq!(
            arithmetic(ArithmeticOp::Add, &Value::Long(2), &Value::Long(3)).unwrap(),
            Value::Long(5)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Div, &Value::Long(7), &Value::Long(2)).unwrap(),
            Value::Long(3)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Div, &Value::Long(7), &Value::Double(2.0)).unwrap(),
            Value::Double(3.5)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Add, &Value::Long(i64::MAX), &Value::Long(1)).unwrap(),
            Value::Long(i64::MIN)
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            arithmetic(ArithmeticOp::Div, &Value::Long(1), &Value::Long(0)),
            Err(EvaluationError::DivisionByZero)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Rem, &Value::Long(1), &Value::Long(0)),
            Err(EvaluationError::DivisionByZero)
        );
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(ComparisonOp::Eq, &Value::Long(1), &Value::Double(1.0)));
        assert!(compare(ComparisonOp::Lt, &Value::Long(1), &Value::Double(1.5)));
        assert!(compare(ComparisonOp::Gte, &Value::from("b"), &Value::from("a")));

        assert!(!compare(ComparisonOp::Eq, &Value::from("1"), &Value::Long(1)));
        assert!(!compare(ComparisonOp::Lt, &Value::from("1"), &Value::Long(2)));
        assert!(!compare(ComparisonOp::Gt, &Value::Null, &Value::Long(2)));
        assert!(compare(ComparisonOp::Ne, &Value::Null, &Value::Long(2)));
    }

    #[test]
    fn test_indexing() {
        let list = Value::from(vec![10, 20]);
        assert_eq!(index(&list, &Value::Long(1)), Value::Long(20));
        assert_eq!(index(&list, &Value::Long(5)), Value::Null);
        assert_eq!(index(&list, &Value::Long(-1)), Value::Null);
        assert_eq!(index(&Value::Null, &Value::Long(0)), Value::Null);
    }
}
