//! Pairwise coercion rules.
//!
//! Coercion is total: every `(source kind, target kind)` pair has a defined
//! result, and failure is encoded in the return value rather than as an
//! `Err` — mirroring the VM's own "never panics, never raises" contract.

use super::{Kind, Value};

/// Coerce `v` to an `i64`. Returns `(0, false)` on failure.
pub fn to_int(v: &Value) -> (i64, bool) {
    match v {
        Value::Int(i) => (*i, true),
        Value::Number(n) => (*n as i64, true),
        Value::Bool(b) => (*b as i64, true),
        Value::String(s) => parse_int_str(s),
        Value::Slice(items) => items.first().map(to_int).unwrap_or((0, false)),
        Value::Nil => (0, false),
        _ => (0, false),
    }
}

fn parse_int_str(s: &str) -> (i64, bool) {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|i| (i, true)).unwrap_or((0, false));
    }
    if s.contains('.') {
        return s.parse::<f64>().map(|n| (n as i64, true)).unwrap_or((0, false));
    }
    s.parse::<i64>().map(|i| (i, true)).unwrap_or((0, false))
}

/// Coerce `v` to an `f64`. Returns `NaN` on failure.
pub fn to_float(v: &Value) -> f64 {
    match v {
        Value::Number(n) => *n,
        Value::Int(i) => *i as f64,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => parse_float_str(s),
        Value::Slice(items) => items.first().map(to_float).unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn parse_float_str(s: &str) -> f64 {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|i| i as f64).unwrap_or(f64::NAN);
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// Coerce `v` to a `bool` per the 0/1 and "true"/"false" rules.
pub fn to_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => {
                let (i, ok) = to_int(v);
                ok && i != 0
            }
        },
        Value::Int(_) | Value::Number(_) => {
            let (i, _) = to_int(v);
            i != 0
        }
        _ => {
            let (i, ok) = to_int(v);
            ok && i != 0
        }
    }
}

/// Coerce `v` to a `String` (default render for composite kinds).
pub fn to_string_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.to_string(),
        Value::Slice(items) if items.len() == 1 => to_string_value(&items[0]),
        other => other.to_string(),
    }
}

/// Coerce `src` into the target `kind`, returning a fresh [`Value`].
pub fn coerce_to(src: &Value, kind: Kind) -> Value {
    match kind {
        Kind::Int => {
            let (i, ok) = to_int(src);
            if ok {
                Value::Int(i)
            } else {
                Value::Nil
            }
        }
        Kind::Number => Value::Number(to_float(src)),
        Kind::Bool => Value::Bool(to_bool(src)),
        Kind::String => Value::string(to_string_value(src)),
        _ => src.clone(),
    }
}

/// `Equal(a, b)`: coerce `b` to `a`'s kind, then compare natively.
///
/// `Nil` compares equal only to `Nil`.
pub fn equal(a: &Value, b: &Value) -> bool {
    if matches!(a, Value::Nil) || matches!(b, Value::Nil) {
        return matches!(a, Value::Nil) && matches!(b, Value::Nil);
    }
    match a.kind() {
        Kind::Bool => to_bool(a) == to_bool(b),
        Kind::Int => to_int(a).0 == to_int(b).0,
        Kind::Number => {
            let (x, y) = (to_float(a), to_float(b));
            !x.is_nan() && !y.is_nan() && x == y
        }
        Kind::String => to_string_value(a) == to_string_value(b),
        Kind::Strings => match b {
            Value::Strings(bs) => {
                if let Value::Strings(as_) = a {
                    as_ == bs
                } else {
                    false
                }
            }
            _ => false,
        },
        Kind::Time => match (a, b) {
            (Value::Time(x), Value::Time(y)) => x == y,
            _ => false,
        },
        _ => to_string_value(a) == to_string_value(b),
    }
}

/// `IsNil(v)`: true for Nil, empty string, numeric zero, or an empty collection.
pub fn is_nil(v: &Value) -> bool {
    match v {
        Value::Nil => true,
        Value::String(s) => s.is_empty(),
        Value::Int(i) => *i == 0,
        Value::Number(n) => *n == 0.0,
        Value::Slice(s) => s.is_empty(),
        Value::Strings(s) => s.is_empty(),
        _ => false,
    }
}

/// Priority ladder used when neither side's kind is authoritative, e.g. when
/// picking a "wider" kind for a binary arithmetic result: String < Int <
/// Number < Bool.
pub fn priority(kind: Kind) -> u8 {
    match kind {
        Kind::String => 0,
        Kind::Int => 1,
        Kind::Number => 2,
        Kind::Bool => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_coercion() {
        assert_eq!(to_int(&Value::Number(3.9)), (3, true));
        assert_eq!(to_int(&Value::string("42")), (42, true));
        assert_eq!(to_int(&Value::string("0x2A")), (42, true));
        assert_eq!(to_int(&Value::string("3.5")), (3, true));
        assert_eq!(to_int(&Value::string("nope")).1, false);
        assert_eq!(to_int(&Value::Slice(vec![Value::Int(7), Value::Int(8)])), (7, true));
    }

    #[test]
    fn float_coercion_failure_is_nan() {
        assert!(to_float(&Value::string("nope")).is_nan());
    }

    #[test]
    fn bool_coercion() {
        assert!(to_bool(&Value::Int(1)));
        assert!(!to_bool(&Value::Int(0)));
        assert!(to_bool(&Value::string("true")));
        assert!(to_bool(&Value::string("TRUE")));
        assert!(!to_bool(&Value::string("false")));
    }

    #[test]
    fn equal_commutative_for_scalars() {
        let pairs = [
            (Value::Int(3), Value::Number(3.0)),
            (Value::string("true"), Value::Bool(true)),
            (Value::string("5"), Value::Int(5)),
        ];
        for (a, b) in pairs {
            assert_eq!(equal(&a, &b), equal(&b, &a), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn nil_equals_only_nil() {
        assert!(equal(&Value::Nil, &Value::Nil));
        assert!(!equal(&Value::Nil, &Value::Int(0)));
        assert!(!equal(&Value::Int(0), &Value::Nil));
    }

    #[test]
    fn is_nil_rules() {
        assert!(is_nil(&Value::Nil));
        assert!(is_nil(&Value::string("")));
        assert!(is_nil(&Value::Int(0)));
        assert!(!is_nil(&Value::Int(1)));
    }
}
