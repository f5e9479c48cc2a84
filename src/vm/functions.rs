//! Function registry dispatched by case-insensitive name.

use crate::value::{coerce, Value};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// `(min_args, max_args)`; `max_args == None` means unbounded.
pub struct Signature {
    pub min_args: usize,
    pub max_args: Option<usize>,
}

pub type Handler = fn(&[Value], DateTime<Utc>) -> (Value, bool);

pub struct FunctionEntry {
    pub signature: Signature,
    pub handler: Handler,
}

static REGISTRY: Lazy<HashMap<&'static str, FunctionEntry>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, FunctionEntry> = HashMap::new();
    m.insert(
        "length",
        FunctionEntry {
            signature: Signature { min_args: 1, max_args: Some(1) },
            handler: |args, _now| (Value::Int(coerce::to_string_value(&args[0]).chars().count() as i64), true),
        },
    );
    m.insert(
        "lower",
        FunctionEntry {
            signature: Signature { min_args: 1, max_args: Some(1) },
            handler: |args, _now| (Value::string(coerce::to_string_value(&args[0]).to_lowercase()), true),
        },
    );
    m.insert(
        "upper",
        FunctionEntry {
            signature: Signature { min_args: 1, max_args: Some(1) },
            handler: |args, _now| (Value::string(coerce::to_string_value(&args[0]).to_uppercase()), true),
        },
    );
    m.insert(
        "now",
        FunctionEntry {
            signature: Signature { min_args: 0, max_args: Some(0) },
            handler: |_args, now| (Value::Time(now), true),
        },
    );
    m.insert(
        "yy",
        FunctionEntry {
            signature: Signature { min_args: 1, max_args: Some(1) },
            handler: |args, _now| match args[0] {
                Value::Time(t) => (Value::Int((t.format("%y").to_string()).parse().unwrap_or(0)), true),
                _ => (Value::Nil, false),
            },
        },
    );
    m.insert(
        "todate",
        FunctionEntry {
            signature: Signature { min_args: 1, max_args: Some(1) },
            handler: |args, _now| match &args[0] {
                Value::Time(t) => (Value::Time(*t), true),
                Value::String(s) => resolve_date_math(s, Utc::now())
.map(|t| (Value::Time(t), true))
.unwrap_or((Value::Nil, false)),
                _ => (Value::Nil, false),
            },
        },
    );
    m
});

pub fn lookup(name: &str) -> Option<&'static FunctionEntry> {
    REGISTRY.get(name.to_lowercase().as_str())
}

pub fn call(name: &str, args: &[Value], now: DateTime<Utc>) -> (Value, bool) {
    match lookup(name) {
        Some(entry) => {
            let in_range = args.len() >= entry.signature.min_args
                && match entry.signature.max_args {
                    Some(max) => args.len() <= max,
                    None => true,
                };
            if !in_range {
                return (Value::Nil, false);
            }
            (entry.handler)(args, now)
        }
        None => (Value::Nil, false),
    }
}

/// Resolves a `"now[±N<unit>]"` relative-time literal against `now`
///. Units: `s`econd, `m`inute, `h`our, `d`ay,
/// `M`onth, `y`ear, `w`eek. Returns `None` if the literal is malformed.
pub fn resolve_date_math(literal: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = literal.trim();
    let rest = s.strip_prefix("now")?;
    if rest.is_empty() {
        return Some(now);
    }
    let sign = match rest.as_bytes()[0] {
        b'-' => -1i64,
        b'+' => 1i64,
        _ => return None,
    };
    let body = &rest[1..];
    let unit_start = body.find(|c: char| c.is_ascii_alphabetic())?;
    let (num_part, unit) = body.split_at(unit_start);
    let n: i64 = num_part.parse().ok()?;
    let n = n * sign;
    let delta = match unit {
        "s" => Duration::seconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        "w" => Duration::weeks(n),
        "M" => Duration::days(n * 30),
        "y" => Duration::days(n * 365),
        _ => return None,
    };
    Some(now + delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_math_minus_one_month() {
        let now = DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z").unwrap().with_timezone(&Utc);
        let resolved = resolve_date_math("now-1M", now).unwrap();
        assert!(resolved < now);
    }

    #[test]
    fn unknown_function_returns_not_ok() {
        assert_eq!(call("nope", &[], Utc::now()).1, false);
    }

    #[test]
    fn length_of_string() {
        let (v, ok) = call("length", &[Value::string("hello")], Utc::now());
        assert!(ok);
        assert_eq!(v, Value::Int(5));
    }
}
