use std::fmt;

use crate::common::*;
use crate::config::MAX_SEQUENCE_LEN;

use super::ast::{BinaryOperator, UnaryOperator};
use super::equality::{compare_values, same_identity, value_equal};
use super::store::Store;

/// Stable handle of a value in the `Store`. The generation tells a reused
/// slot apart from the value that lived there before.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Bool,
    Int,
    Float,
    Text,
    List,
    Mapping,
}

impl ValueKind {
    pub fn is_mutable(&self) -> bool {
        match self {
            ValueKind::List | ValueKind::Mapping => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Nil => "nil",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::List => "list",
            ValueKind::Mapping => "mapping",
        };
        f.write_str(name)
    }
}

/// Contents of a store slot. List elements and Mapping pairs are counted
/// references into the same store.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ValueId>),
    Mapping(Mapping),
}

macro_rules! impl_union_unpack_as_value {
    ($func_name:ident, $variant_name:path, $return_type:ty) => {
        impl Value {
            pub fn $func_name(&self) -> Option<$return_type> {
                match self {
                    $variant_name(v) => Some(*v),
                    _ => None,
                }
            }
        }
    }
}

impl_union_unpack_as_value!(as_bool,  Value::Bool,  bool);
impl_union_unpack_as_value!(as_int,   Value::Int,   i64);
impl_union_unpack_as_value!(as_float, Value::Float, f64);

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::List(_) => ValueKind::List,
            Value::Mapping(_) => ValueKind::Mapping,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ValueId]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(v) => Some(v),
            _ => None,
        }
    }

    /// Nil, zero, empty Text/List/Mapping and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Text(v) => !v.is_empty(),
            Value::List(v) => !v.is_empty(),
            Value::Mapping(v) => !v.is_empty(),
        }
    }

    /// Appends every reference this value holds. Mapping pairs are pushed as
    /// key followed by value.
    pub(crate) fn push_children(&self, out: &mut Vec<ValueId>) {
        match self {
            Value::List(items) => out.extend_from_slice(items),
            Value::Mapping(mapping) => out.extend(mapping.ordered_ids()),
            _ => {},
        }
    }
}

/// Hashable projection of an immutable value, used to key a `Mapping`.
/// Floats with an integral value hash as the equal Integer, so `1` and `1.0`
/// address the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

impl MapKey {
    pub fn from_value(value: &Value) -> EvalResult<MapKey> {
        let key = match value {
            Value::Nil => MapKey::Nil,
            Value::Bool(v) => MapKey::Bool(*v),
            Value::Int(v) => MapKey::Int(*v),
            Value::Float(v) => match float_as_int(*v) {
                Some(v) => MapKey::Int(v),
                None => MapKey::Float(v.to_bits()),
            },
            Value::Text(v) => MapKey::Text(v.clone()),
            Value::List(_) | Value::Mapping(_) => {
                return Err(EvalErrorKind::UnhashableKey(value.kind()).into())
            }
        };
        Ok(key)
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Nil => f.write_str("nil"),
            MapKey::Bool(v) => write!(f, "{}", v),
            MapKey::Int(v) => write!(f, "{}", v),
            MapKey::Float(bits) => f.write_str(&format_float(f64::from_bits(*bits))),
            MapKey::Text(v) => f.write_str(&quote_text(v)),
        }
    }
}

/// Insertion ordered pairs. Each pair holds a reference to the key value as
/// it was first inserted and to the current value.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    entries: IndexMap<MapKey, (ValueId, ValueId)>,
}

impl Mapping {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &MapKey) -> Option<(ValueId, ValueId)> {
        self.entries.get(key).copied()
    }

    /// Updates the value of an existing pair in place (returning the old
    /// value) or appends a new pair at the end.
    pub(crate) fn insert(&mut self, hashed: MapKey, key: ValueId, value: ValueId) -> Option<ValueId> {
        match self.entries.get_mut(&hashed) {
            Some(pair) => Some(std::mem::replace(&mut pair.1, value)),
            None => {
                self.entries.insert(hashed, (key, value));
                None
            }
        }
    }

    /// Removes a pair keeping the order of the others. Re-inserting the key
    /// later appends it at the end.
    pub(crate) fn remove(&mut self, hashed: &MapKey) -> Option<(ValueId, ValueId)> {
        self.entries.shift_remove(hashed)
    }

    pub fn keys(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.entries.values().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.entries.values().map(|(_, v)| *v)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&MapKey, ValueId, ValueId)> + '_ {
        self.entries.iter().map(|(h, (k, v))| (h, *k, *v))
    }

    pub(crate) fn ordered_ids(&self) -> Vec<ValueId> {
        let mut ids = Vec::with_capacity(self.entries.len() * 2);
        for (key, value) in self.entries.values() {
            ids.push(*key);
            ids.push(*value);
        }
        ids
    }
}

//------------------------------------------------------------------------------
// Numbers
//------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value) -> Option<Number> {
        match value {
            Value::Int(v) => Some(Number::Int(*v)),
            Value::Float(v) => Some(Number::Float(*v)),
            _ => None,
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

pub(crate) fn float_as_int(v: f64) -> Option<i64> {
    // Upper bound is exclusive: i64::MAX is not representable as f64
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn floor_div_int(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_rem_int(a: i64, b: i64) -> Option<i64> {
    // i64::MIN % -1 overflows in the machine operation only
    if b == -1 {
        return Some(0);
    }
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn floor_rem_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn apply_arithmetic(op: BinaryOperator, lhs: Number, rhs: Number) -> EvalResult<Value> {
    use BinaryOperator as BO;

    macro_rules! checked_int_op {
        ($checked:ident, $a:ident, $b:ident, $name:literal) => {
            $a.$checked($b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::from(EvalErrorKind::ArithmeticOverflow($name)))
        }
    }

    let is_zero = match rhs {
        Number::Int(v) => v == 0,
        Number::Float(v) => v == 0.0,
    };
    if is_zero && (op == BO::Divide || op == BO::FloorDivide || op == BO::Remainder) {
        return Err(EvalErrorKind::DivisionByZero.into());
    }

    match (lhs, rhs) {
        (Number::Int(a), Number::Int(b)) => match op {
            BO::Add => checked_int_op!(checked_add, a, b, "addition"),
            BO::Subtract => checked_int_op!(checked_sub, a, b, "subtraction"),
            BO::Multiply => checked_int_op!(checked_mul, a, b, "multiplication"),
            BO::Divide => Ok(Value::Float(a as f64 / b as f64)),
            BO::FloorDivide => floor_div_int(a, b)
                .map(Value::Int)
                .ok_or_else(|| EvalErrorKind::ArithmeticOverflow("floor division").into()),
            BO::Remainder => floor_rem_int(a, b)
                .map(Value::Int)
                .ok_or_else(|| EvalErrorKind::ArithmeticOverflow("remainder").into()),
            BO::Power => {
                if b < 0 {
                    if a == 0 {
                        return Err(EvalErrorKind::DivisionByZero.into());
                    }
                    return Ok(Value::Float((a as f64).powf(b as f64)));
                }
                let exponent = std::convert::TryFrom::try_from(b)
                    .map_err(|_| EvalError::from(EvalErrorKind::ArithmeticOverflow("power")))?;
                a.checked_pow(exponent)
                    .map(Value::Int)
                    .ok_or_else(|| EvalErrorKind::ArithmeticOverflow("power").into())
            },
            _ => unreachable!("apply_arithmetic with {:?}", op),
        },
        (lhs, rhs) => {
            let a = lhs.as_float();
            let b = rhs.as_float();
            let result = match op {
                BO::Add => a + b,
                BO::Subtract => a - b,
                BO::Multiply => a * b,
                BO::Divide => a / b,
                BO::FloorDivide => (a / b).floor(),
                BO::Remainder => floor_rem_float(a, b),
                BO::Power => {
                    if a == 0.0 && b < 0.0 {
                        return Err(EvalErrorKind::DivisionByZero.into());
                    }
                    a.powf(b)
                },
                _ => unreachable!("apply_arithmetic with {:?}", op),
            };
            Ok(Value::Float(result))
        }
    }
}

/// Clamps a repetition count, negative counts repeat zero times.
pub(crate) fn repeat_count(times: i64) -> usize {
    std::convert::TryFrom::try_from(times.max(0)).unwrap_or(usize::MAX)
}

/// Length of a sequence of `len` elements (or bytes) repeated `times` times.
/// Fails rather than allocate more than `MAX_SEQUENCE_LEN`.
pub(crate) fn repeated_len(len: usize, times: usize) -> EvalResult<usize> {
    match len.checked_mul(times) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(total),
        _ => Err(EvalErrorKind::ArithmeticOverflow("repetition").into()),
    }
}

//------------------------------------------------------------------------------
// Operators
//------------------------------------------------------------------------------

/// Applies a (non short-circuiting) binary operator. Operands are borrowed,
/// the result is a new reference owned by the caller.
pub(crate) fn apply_binary_operator(store: &mut Store, op: BinaryOperator, lhs: ValueId, rhs: ValueId, max_depth: usize) -> EvalResult<ValueId> {
    use BinaryOperator as BO;

    let result = match op {
        BO::Equality => Value::Bool(value_equal(store, lhs, rhs, max_depth)?),
        BO::Inequality => Value::Bool(!value_equal(store, lhs, rhs, max_depth)?),
        BO::Is => Value::Bool(same_identity(lhs, rhs)),
        BO::IsNot => Value::Bool(!same_identity(lhs, rhs)),
        BO::In => Value::Bool(contains(store, rhs, lhs, max_depth)?),
        BO::NotIn => Value::Bool(!contains(store, rhs, lhs, max_depth)?),
        BO::LessThan | BO::LessThanEqual | BO::GreaterThan | BO::GreaterThanEqual => {
            let ordering = compare_values(store, lhs, rhs, max_depth)?;
            let holds = match (op, ordering) {
                (_, None) => false,
                (BO::LessThan, Some(o)) => o == Ordering::Less,
                (BO::LessThanEqual, Some(o)) => o != Ordering::Greater,
                (BO::GreaterThan, Some(o)) => o == Ordering::Greater,
                (BO::GreaterThanEqual, Some(o)) => o != Ordering::Less,
                _ => unreachable!(),
            };
            Value::Bool(holds)
        },
        BO::Add | BO::Subtract | BO::Multiply | BO::Divide |
        BO::FloorDivide | BO::Remainder | BO::Power => {
            return apply_arithmetic_operator(store, op, lhs, rhs);
        },
        BO::LogicalAnd | BO::LogicalOr => {
            unreachable!("short-circuit operator {:?} is evaluated by the executor", op)
        },
    };

    Ok(store.allocate(result))
}

fn apply_arithmetic_operator(store: &mut Store, op: BinaryOperator, lhs: ValueId, rhs: ValueId) -> EvalResult<ValueId> {
    use BinaryOperator as BO;

    enum Sequence { Text(String), List(Vec<ValueId>) }

    let lhs_value = store.get(lhs)?;
    let rhs_value = store.get(rhs)?;
    if let (Some(a), Some(b)) = (Number::from_value(lhs_value), Number::from_value(rhs_value)) {
        let result = apply_arithmetic(op, a, b)?;
        return Ok(store.allocate(result));
    }

    let mismatch = || EvalError::type_mismatch(op.symbol(), lhs_value.kind(), Some(rhs_value.kind()));
    let sequence = match (op, lhs_value, rhs_value) {
        (BO::Add, Value::Text(a), Value::Text(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Sequence::Text(joined)
        },
        (BO::Add, Value::List(a), Value::List(b)) => {
            let mut joined = Vec::with_capacity(a.len() + b.len());
            joined.extend_from_slice(a);
            joined.extend_from_slice(b);
            Sequence::List(joined)
        },
        (BO::Multiply, Value::Text(text), Value::Int(times)) |
        (BO::Multiply, Value::Int(times), Value::Text(text)) => {
            let times = repeat_count(*times);
            if repeated_len(text.len(), times)? == 0 {
                Sequence::Text(String::new())
            } else {
                Sequence::Text(text.repeat(times))
            }
        },
        // One level deep: the new list references the same elements
        (BO::Multiply, Value::List(items), Value::Int(times)) |
        (BO::Multiply, Value::Int(times), Value::List(items)) => {
            let times = repeat_count(*times);
            let total = repeated_len(items.len(), times)?;
            let mut repeated = Vec::with_capacity(total);
            if total != 0 {
                for _ in 0..times {
                    repeated.extend_from_slice(items);
                }
            }
            Sequence::List(repeated)
        },
        _ => return Err(mismatch()),
    };

    let value = match sequence {
        Sequence::Text(text) => Value::Text(text),
        Sequence::List(items) => {
            for item in &items {
                store.retain(*item)?;
            }
            Value::List(items)
        }
    };
    Ok(store.allocate(value))
}

pub(crate) fn apply_unary_operator(store: &mut Store, op: UnaryOperator, operand: ValueId) -> EvalResult<ValueId> {
    use UnaryOperator as UO;

    // `None` means the operand itself is the result
    let result = match (op, store.get(operand)?) {
        (UO::LogicalNot, value) => Some(Value::Bool(!value.is_truthy())),
        (UO::Negative, Value::Int(v)) => Some(Value::Int(
            v.checked_neg().ok_or_else(|| EvalError::from(EvalErrorKind::ArithmeticOverflow("negation")))?
        )),
        (UO::Negative, Value::Float(v)) => Some(Value::Float(-*v)),
        (UO::Positive, Value::Int(_)) | (UO::Positive, Value::Float(_)) => None,
        (op, value) => return Err(EvalError::type_mismatch(op.symbol(), value.kind(), None)),
    };

    match result {
        Some(result) => Ok(store.allocate(result)),
        None => {
            store.retain(operand)?;
            Ok(operand)
        }
    }
}

/// Membership test `item in container`.
pub(crate) fn contains(store: &Store, container: ValueId, item: ValueId, max_depth: usize) -> EvalResult<bool> {
    match store.get(container)? {
        Value::List(items) => {
            for candidate in items {
                if value_equal(store, *candidate, item, max_depth)? {
                    return Ok(true);
                }
            }
            Ok(false)
        },
        Value::Mapping(mapping) => {
            let hashed = MapKey::from_value(store.get(item)?)?;
            Ok(mapping.get(&hashed).is_some())
        },
        Value::Text(text) => match store.get(item)? {
            Value::Text(needle) => Ok(text.contains(needle.as_str())),
            other => Err(EvalError::type_mismatch("in", other.kind(), Some(ValueKind::Text))),
        },
        other => Err(EvalErrorKind::NotIterable(other.kind()).into()),
    }
}

//------------------------------------------------------------------------------
// Rendering
//------------------------------------------------------------------------------

pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn quote_text(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Renders a value for output: Text as is, everything else in its literal
/// form. Containers that contain themselves render the inner occurrence as
/// `[...]` or `{...}`.
pub fn render(store: &Store, id: ValueId, max_depth: usize) -> EvalResult<String> {
    if let Value::Text(text) = store.get(id)? {
        return Ok(text.clone());
    }

    let mut out = String::new();
    let mut active = Vec::new();
    write_literal(store, id, &mut out, &mut active, max_depth)?;
    Ok(out)
}

fn write_literal(store: &Store, id: ValueId, out: &mut String, active: &mut Vec<ValueId>, max_depth: usize) -> EvalResult<()> {
    use std::fmt::Write;

    let value = store.get(id)?;
    if active.contains(&id) {
        out.push_str(if value.kind() == ValueKind::List { "[...]" } else { "{...}" });
        return Ok(());
    }
    if active.len() >= max_depth {
        return Err(EvalErrorKind::RecursionLimit(max_depth).into());
    }

    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(v) => { let _ = write!(out, "{}", v); },
        Value::Int(v) => { let _ = write!(out, "{}", v); },
        Value::Float(v) => out.push_str(&format_float(*v)),
        Value::Text(v) => out.push_str(&quote_text(v)),
        Value::List(items) => {
            active.push(id);
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx != 0 {
                    out.push_str(", ");
                }
                write_literal(store, *item, out, active, max_depth)?;
            }
            out.push(']');
            active.pop();
        },
        Value::Mapping(mapping) => {
            active.push(id);
            out.push('{');
            for (idx, (_, key, value)) in mapping.pairs().enumerate() {
                if idx != 0 {
                    out.push_str(", ");
                }
                write_literal(store, key, out, active, max_depth)?;
                out.push_str(": ");
                write_literal(store, value, out, active, max_depth)?;
            }
            out.push('}');
            active.pop();
        },
    }

    Ok(())
}
