//! The tree-walking evaluator.
//!
//! `eval` never panics and never returns a Rust error: any type mismatch or
//! missing lookup degrades to `(Value::Nil, false)`, the same "best effort"
//! evaluation style `vm.rs`'s `RelOps` machinery uses.

pub mod functions;

use crate::ast::{BinaryOp, Node, SelectColumn, UnaryOp};
use crate::context::{ContextReader, Simple};
use crate::value::{coerce, Value};
use chrono::{DateTime, Utc};
use regex::Regex;

/// Everything `eval` needs beyond the expression tree itself: a row reader
/// and the "now" instant date-math literals resolve against.
pub struct EvalCtx<'a> {
    pub reader: &'a dyn ContextReader,
    pub now: DateTime<Utc>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(reader: &'a dyn ContextReader, now: DateTime<Utc>) -> Self {
        EvalCtx { reader, now }
    }
}

/// `Eval(ctx, node) -> (Value, ok)`.
pub fn eval(ctx: &EvalCtx, node: &Node) -> (Value, bool) {
    match node {
        Node::Identity(name) => ctx.reader.get(name),
        Node::Literal(v) => (v.clone(), true),
        Node::Null => (Value::Nil, true),
        // Resolved at planning time (`Planner::prepare_predicate`); a node
        // reaching here means it was evaluated outside the planner.
        Node::Include(_) => (Value::Nil, false),
        Node::Unary(UnaryOp::Exists, inner) => {
            let (_, ok) = eval(ctx, inner);
            (Value::Bool(ok), true)
        }
        Node::Unary(UnaryOp::Not, inner) => {
            let (v, ok) = eval(ctx, inner);
            if !ok {
                return (Value::Nil, false);
            }
            (Value::Bool(!coerce::to_bool(&v)), true)
        }
        Node::Unary(UnaryOp::Neg, inner) => {
            let (v, ok) = eval(ctx, inner);
            if !ok {
                return (Value::Nil, false);
            }
            (Value::Number(-coerce::to_float(&v)), true)
        }
        Node::Tri(value, lo, hi) => eval_between(ctx, value, lo, hi),
        Node::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let (v, ok) = eval(ctx, item);
                if !ok {
                    return (Value::Nil, false);
                }
                out.push(v);
            }
            (Value::Slice(out), true)
        }
        Node::Func { name, args } => eval_func(ctx, name, args),
        Node::Binary(BinaryOp::And, l, r) => eval_and(ctx, l, r),
        Node::Binary(BinaryOp::Or, l, r) => eval_or(ctx, l, r),
        Node::Binary(BinaryOp::In, l, r) => eval_in(ctx, l, r),
        Node::Binary(BinaryOp::Like, l, r) => eval_like(ctx, l, r),
        Node::Binary(BinaryOp::Contains, l, r) => eval_contains(ctx, l, r, false),
        Node::Binary(BinaryOp::Intersects, l, r) => eval_contains(ctx, l, r, true),
        Node::Binary(op @ (BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte), l, r) => {
            eval_comparison(ctx, *op, l, r)
        }
        Node::Binary(op, l, r) => eval_arithmetic(ctx, *op, l, r),
    }
}

fn eval_and(ctx: &EvalCtx, l: &Node, r: &Node) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    if lok && !coerce::to_bool(&lv) {
        return (Value::Bool(false), true);
    }
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    (Value::Bool(coerce::to_bool(&lv) && coerce::to_bool(&rv)), true)
}

fn eval_or(ctx: &EvalCtx, l: &Node, r: &Node) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    if lok && coerce::to_bool(&lv) {
        return (Value::Bool(true), true);
    }
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    (Value::Bool(coerce::to_bool(&lv) || coerce::to_bool(&rv)), true)
}

fn eval_comparison(ctx: &EvalCtx, op: BinaryOp, l: &Node, r: &Node) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    if op == BinaryOp::Eq {
        return (Value::Bool(coerce::equal(&lv, &rv)), true);
    }
    if op == BinaryOp::Neq {
        return (Value::Bool(!coerce::equal(&lv, &rv)), true);
    }
    let coerced_rhs = coerce::coerce_to(&rv, lv.kind());
    let ordering = match lv.kind() {
        crate::value::Kind::String => coerce::to_string_value(&lv).partial_cmp(&coerce::to_string_value(&coerced_rhs)),
        crate::value::Kind::Time => match (&lv, &coerced_rhs) {
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            _ => None,
        },
        _ => coerce::to_float(&lv).partial_cmp(&coerce::to_float(&coerced_rhs)),
    };
    let Some(ord) = ordering else {
        return (Value::Nil, false);
    };
    let result = match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Lte => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Gte => ord.is_ge(),
        _ => unreachable!(),
    };
    (Value::Bool(result), true)
}

fn eval_arithmetic(ctx: &EvalCtx, op: BinaryOp, l: &Node, r: &Node) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    let (x, y) = (coerce::to_float(&lv), coerce::to_float(&rv));
    if x.is_nan() || y.is_nan() {
        return (Value::Nil, false);
    }
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return (Value::Number(f64::NAN), true);
            }
            x / y
        }
        BinaryOp::Mod => x % y,
        _ => unreachable!(),
    };
    (Value::Number(result), true)
}

fn eval_between(ctx: &EvalCtx, value: &Node, lo: &Node, hi: &Node) -> (Value, bool) {
    let (v, vok) = eval(ctx, value);
    let (lo_v, lo_ok) = eval(ctx, lo);
    let (hi_v, hi_ok) = eval(ctx, hi);
    if !vok || !lo_ok || !hi_ok {
        return (Value::Nil, false);
    }
    let x = coerce::to_float(&v);
    let a = coerce::to_float(&lo_v);
    let b = coerce::to_float(&hi_v);
    (Value::Bool(a <= x && x <= b), true)
}

fn eval_in(ctx: &EvalCtx, l: &Node, r: &Node) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    let Value::Slice(items) = rv else {
        return (Value::Nil, false);
    };
    (Value::Bool(items.iter().any(|item| coerce::equal(&lv, item))), true)
}

fn eval_like(ctx: &EvalCtx, l: &Node, r: &Node) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    let haystack = coerce::to_string_value(&lv);
    let pattern = coerce::to_string_value(&rv);
    match glob_to_regex(&pattern) {
        Some(re) => (Value::Bool(re.is_match(&haystack)), true),
        None => (Value::Nil, false),
    }
}

const REGEX_METACHARS: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c if REGEX_METACHARS.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

fn eval_contains(ctx: &EvalCtx, l: &Node, r: &Node, intersects: bool) -> (Value, bool) {
    let (lv, lok) = eval(ctx, l);
    let (rv, rok) = eval(ctx, r);
    if !lok || !rok {
        return (Value::Nil, false);
    }
    match (&lv, &rv) {
        (Value::Slice(items), Value::Slice(needles)) if intersects => {
            (Value::Bool(needles.iter().any(|n| items.iter().any(|i| coerce::equal(i, n)))), true)
        }
        (Value::Slice(items), needle) => (Value::Bool(items.iter().any(|i| coerce::equal(i, needle))), true),
        (Value::String(_), _) => {
            let haystack = coerce::to_string_value(&lv);
            let needle = coerce::to_string_value(&rv);
            (Value::Bool(haystack.contains(&needle)), true)
        }
        _ => (Value::Nil, false),
    }
}

fn eval_func(ctx: &EvalCtx, name: &str, args: &[Node]) -> (Value, bool) {
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        let (v, ok) = eval(ctx, a);
        if !ok {
            return (Value::Nil, false);
        }
        values.push(v);
    }
    functions::call(name, &values, ctx.now)
}

/// `EvalSql(sel, writeCtx, readCtx)`: projects each column expression into a
/// fresh row under its alias (or its identity path).
pub fn eval_sql(columns: &[SelectColumn], ctx: &EvalCtx) -> Simple {
    let mut out = Simple::default();
    for col in columns {
        let (v, ok) = eval(ctx, &col.expr);
        if ok {
            out.insert(col.output_name(), v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Simple;
    use std::collections::BTreeMap;

    fn ctx_with(pairs: &[(&str, Value)]) -> Simple {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Simple::new(m)
    }

    #[test]
    fn missing_identity_is_not_ok() {
        let reader = Simple::default();
        let ctx = EvalCtx::new(&reader, Utc::now());
        let (v, ok) = eval(&ctx, &Node::Identity("missing".into()));
        assert!(!ok);
        assert_eq!(v, Value::Nil);
    }

    #[test]
    fn exists_is_always_bool() {
        let reader = Simple::default();
        let ctx = EvalCtx::new(&reader, Utc::now());
        let (v, ok) = eval(&ctx, &Node::Unary(UnaryOp::Exists, Box::new(Node::Identity("missing".into()))));
        assert!(ok);
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn division_by_zero_is_nan_but_ok() {
        let reader = Simple::default();
        let ctx = EvalCtx::new(&reader, Utc::now());
        let node = Node::Binary(BinaryOp::Div, Box::new(Node::Literal(Value::Int(1))), Box::new(Node::Literal(Value::Int(0))));
        let (v, ok) = eval(&ctx, &node);
        assert!(ok);
        match v {
            Value::Number(n) => assert!(n.is_nan()),
            _ => panic!("expected number"),
        }
    }

    #[test]
    fn like_glob_translation() {
        let reader = ctx_with(&[("name", Value::string("hello world"))]);
        let ctx = EvalCtx::new(&reader, Utc::now());
        let node = Node::Binary(
            BinaryOp::Like,
            Box::new(Node::Identity("name".into())),
            Box::new(Node::Literal(Value::string("hello%"))),
        );
        let (v, ok) = eval(&ctx, &node);
        assert!(ok);
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn date_math_predicate_over_created_column() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z").unwrap().with_timezone(&Utc);
        let created = now - chrono::Duration::days(40);
        let reader = ctx_with(&[("created", Value::Time(created))]);
        let ctx = EvalCtx { reader: &reader, now };
        let lit = functions::resolve_date_math("now-1M", now).unwrap();
        let node = Node::Binary(
            BinaryOp::Lt,
            Box::new(Node::Identity("created".into())),
            Box::new(Node::Literal(Value::Time(lit))),
        );
        let (v, ok) = eval(&ctx, &node);
        assert!(ok);
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn eval_sql_projects_named_columns() {
        let reader = ctx_with(&[("int5", Value::Int(5))]);
        let ctx = EvalCtx::new(&reader, Utc::now());
        let cols = vec![SelectColumn {
            expr: Node::Identity("int5".into()),
            alias: None,
        }];
        let out = eval_sql(&cols, &ctx);
        assert_eq!(out.get("int5").0, Value::Int(5));
    }
}
