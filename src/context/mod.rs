//! Context readers: the narrow trait the VM reads rows through. Concrete composable implementations avoid runtime type
//! assertions at call sites.

use crate::value::Value;
use std::collections::BTreeMap;

/// `{get, row}` — deliberately narrow so every call site dispatches through
/// the trait object rather than downcasting.
pub trait ContextReader {
    fn get(&self, key: &str) -> (Value, bool);
    fn row(&self) -> BTreeMap<String, Value>;
}

/// Backed directly by a name→Value map.
#[derive(Debug, Clone, Default)]
pub struct Simple {
    values: BTreeMap<String, Value>,
}

impl Simple {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Simple { values }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }
}

impl ContextReader for Simple {
    fn get(&self, key: &str) -> (Value, bool) {
        match self.values.get(key) {
            Some(v) => (v.clone(), true),
            None => (Value::Nil, false),
        }
    }

    fn row(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }
}

/// Wraps an inner reader, rewriting keys as `prefix.key` (prefix lower-cased).
pub struct Namespaced<R> {
    prefix: String,
    inner: R,
}

impl<R: ContextReader> Namespaced<R> {
    pub fn new(prefix: impl Into<String>, inner: R) -> Self {
        Namespaced {
            prefix: prefix.into().to_ascii_lowercase(),
            inner,
        }
    }
}

impl<R: ContextReader> ContextReader for Namespaced<R> {
    fn get(&self, key: &str) -> (Value, bool) {
        let Some(rest) = key.strip_prefix(&self.prefix).and_then(|r| r.strip_prefix('.')) else {
            return (Value::Nil, false);
        };
        self.inner.get(rest)
    }

    fn row(&self) -> BTreeMap<String, Value> {
        self.inner
.row()
.into_iter()
.map(|(k, v)| (format!("{}.{}", self.prefix, k), v))
.collect()
    }
}

/// Composes an ordered sequence of readers; lookup returns the first match,
/// `row()` unions keys with earlier readers taking precedence.
pub struct Nested {
    readers: Vec<Box<dyn ContextReader>>,
}

impl Nested {
    pub fn new(readers: Vec<Box<dyn ContextReader>>) -> Self {
        Nested { readers }
    }
}

impl ContextReader for Nested {
    fn get(&self, key: &str) -> (Value, bool) {
        for r in &self.readers {
            let (v, ok) = r.get(key);
            if ok {
                return (v, ok);
            }
        }
        (Value::Nil, false)
    }

    fn row(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for r in self.readers.iter().rev() {
            out.extend(r.row());
        }
        out
    }
}

/// Wraps form-style multi-valued string maps; `get` returns the first value
/// coerced to `String`.
#[derive(Debug, Clone, Default)]
pub struct UrlValues {
    values: BTreeMap<String, Vec<String>>,
}

impl UrlValues {
    pub fn new(values: BTreeMap<String, Vec<String>>) -> Self {
        UrlValues { values }
    }
}

impl ContextReader for UrlValues {
    fn get(&self, key: &str) -> (Value, bool) {
        match self.values.get(key).and_then(|v| v.first()) {
            Some(s) => (Value::string(s.clone()), true),
            None => (Value::Nil, false),
        }
    }

    fn row(&self) -> BTreeMap<String, Value> {
        self.values
.iter()
.filter_map(|(k, v)| v.first().map(|s| (k.clone(), Value::string(s.clone()))))
.collect()
    }
}

/// Adapts a positional row (a `SqlDriverMessage`-equivalent) via a
/// `name -> index` column map.
pub struct ValueContextWrapper<'a> {
    columns: &'a BTreeMap<String, usize>,
    values: &'a [Value],
}

impl<'a> ValueContextWrapper<'a> {
    pub fn new(columns: &'a BTreeMap<String, usize>, values: &'a [Value]) -> Self {
        ValueContextWrapper { columns, values }
    }
}

impl<'a> ContextReader for ValueContextWrapper<'a> {
    fn get(&self, key: &str) -> (Value, bool) {
        match self.columns.get(key).and_then(|&i| self.values.get(i)) {
            Some(v) => (v.clone(), true),
            None => (Value::Nil, false),
        }
    }

    fn row(&self) -> BTreeMap<String, Value> {
        self.columns
.iter()
.filter_map(|(name, &i)| self.values.get(i).map(|v| (name.clone(), v.clone())))
.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(pairs: &[(&str, &str)]) -> Simple {
        let mut s = Simple::default();
        for (k, v) in pairs {
            s.insert(*k, Value::string(*v));
        }
        s
    }

    #[test]
    fn nested_reader_precedence() {
        let r1 = simple(&[("a", "a1"), ("b", "b1")]);
        let r2 = simple(&[("b", "b2"), ("c", "c1")]);
        let r3 = simple(&[("c", "c2"), ("d", "d1")]);
        let nested = Nested::new(vec![Box::new(r1), Box::new(r2), Box::new(r3)]);

        assert_eq!(nested.get("a").0.to_string(), "a1");
        assert_eq!(nested.get("b").0.to_string(), "b1");
        assert_eq!(nested.get("c").0.to_string(), "c1");
        assert_eq!(nested.get("d").0.to_string(), "d1");
        assert_eq!(nested.row().len(), 4);
    }

    #[test]
    fn namespaced_and_nested_compose() {
        let foo = Namespaced::new("foo", simple(&[("a", "a1"), ("b", "b1"), ("d", "d1")]));
        let bar = Namespaced::new("BAR", simple(&[("b", "b2"), ("c", "c1")]));
        let plain = simple(&[("a", "a1")]);
        let nested = Nested::new(vec![Box::new(foo), Box::new(bar), Box::new(plain)]);

        assert_eq!(nested.get("foo.a").0.to_string(), "a1");
        assert_eq!(nested.get("foo.b").0.to_string(), "b1");
        assert_eq!(nested.get("foo.d").0.to_string(), "d1");
        assert_eq!(nested.get("bar.b").0.to_string(), "b2");
        assert_eq!(nested.get("bar.c").0.to_string(), "c1");
        assert_eq!(nested.get("a").0.to_string(), "a1");
        assert_eq!(nested.row().len(), 6);
    }

    #[test]
    fn url_values_takes_first() {
        let mut m = BTreeMap::new();
        m.insert("tag".to_string(), vec!["x".to_string(), "y".to_string()]);
        let uv = UrlValues::new(m);
        assert_eq!(uv.get("tag").0.to_string(), "x");
    }
}
