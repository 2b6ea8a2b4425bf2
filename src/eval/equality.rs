use crate::common::*;

use super::store::Store;
use super::value::{float_as_int, Value, ValueId};

/// Identity comparison: both handles denote the same store value.
pub fn same_identity(lhs: ValueId, rhs: ValueId) -> bool {
    lhs == rhs
}

/// Structural equality. Lists compare element-wise in order, Mappings by
/// key set and paired values regardless of insertion order, an Integer
/// equals a Float of the same mathematical value.
///
/// Identical handles are always equal, which keeps the comparison reflexive
/// (also for containers holding themselves) and guarantees that
/// `same_identity` implies `value_equal`. Whether two equal immutable values
/// share a handle never changes the outcome.
pub fn value_equal(store: &Store, lhs: ValueId, rhs: ValueId, max_depth: usize) -> EvalResult<bool> {
    equal_at_depth(store, lhs, rhs, 0, max_depth)
}

fn equal_at_depth(store: &Store, lhs: ValueId, rhs: ValueId, depth: usize, max_depth: usize) -> EvalResult<bool> {
    let lhs_value = store.get(lhs)?;
    let rhs_value = store.get(rhs)?;
    if same_identity(lhs, rhs) {
        return Ok(true);
    }
    if depth >= max_depth {
        return Err(EvalErrorKind::RecursionLimit(max_depth).into());
    }

    let equal = match (lhs_value, rhs_value) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) |
        (Value::Float(b), Value::Int(a)) => float_as_int(*b) == Some(*a),
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (a, b) in a.iter().zip(b.iter()) {
                if !equal_at_depth(store, *a, *b, depth + 1, max_depth)? {
                    return Ok(false);
                }
            }
            true
        },
        (Value::Mapping(a), Value::Mapping(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (hashed, _, a_value) in a.pairs() {
                match b.get(hashed) {
                    Some((_, b_value)) => {
                        if !equal_at_depth(store, a_value, b_value, depth + 1, max_depth)? {
                            return Ok(false);
                        }
                    },
                    None => return Ok(false),
                }
            }
            true
        },
        _ => false,
    };

    Ok(equal)
}

/// Ordering used by `<`, `<=`, `>` and `>=`. Numbers compare numerically,
/// Texts and Lists lexicographically. `None` if the values are unordered
/// (a NaN is involved).
pub fn compare_values(store: &Store, lhs: ValueId, rhs: ValueId, max_depth: usize) -> EvalResult<Option<Ordering>> {
    compare_at_depth(store, lhs, rhs, 0, max_depth)
}

fn compare_at_depth(store: &Store, lhs: ValueId, rhs: ValueId, depth: usize, max_depth: usize) -> EvalResult<Option<Ordering>> {
    if depth >= max_depth {
        return Err(EvalErrorKind::RecursionLimit(max_depth).into());
    }

    let lhs_value = store.get(lhs)?;
    let rhs_value = store.get(rhs)?;
    let ordering = match (lhs_value, rhs_value) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => compare_int_float(*a, *b),
        (Value::Float(a), Value::Int(b)) => compare_int_float(*b, *a).map(Ordering::reverse),
        (Value::Text(a), Value::Text(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::List(a), Value::List(b)) => {
            // First differing element decides, otherwise the shorter list
            for (a, b) in a.iter().zip(b.iter()) {
                if !equal_at_depth(store, *a, *b, depth + 1, max_depth)? {
                    return compare_at_depth(store, *a, *b, depth + 1, max_depth);
                }
            }
            Some(a.len().cmp(&b.len()))
        },
        (a, b) => return Err(EvalError::type_mismatch("ordering comparison", a.kind(), Some(b.kind()))),
    };

    Ok(ordering)
}

/// Exact ordering of an Integer against a Float, without rounding the
/// Integer to the nearest representable Float.
fn compare_int_float(int: i64, float: f64) -> Option<Ordering> {
    // 2^63, the first Float above every Integer
    const INT_BOUND: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return None;
    }
    if float >= INT_BOUND {
        return Some(Ordering::Less);
    }
    if float < -INT_BOUND {
        return Some(Ordering::Greater);
    }

    let floor = float.floor();
    match int.cmp(&(floor as i64)) {
        Ordering::Equal if float > floor => Some(Ordering::Less),
        ordering => Some(ordering),
    }
}
