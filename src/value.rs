//! Generic nested record values and their flat-map projection.
//!
//! The mirror layer treats device state abstractly: a tree whose interior
//! nodes are key->child maps and whose leaves are primitives or fixed-length
//! sequences of primitives. A fully-populated reference record fixes the
//! shape; [`flatten`]/[`unflatten`] convert between the nested form and a
//! path-indexed map, and [`match_type`] is the structural predicate every
//! mutation must pass.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One node of a nested record.
///
/// Sequences are *leaf* values of the flat projection: flattening recurses
/// through maps only, so a four-lane enable array travels (and type-checks)
/// as a single unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    UInt(u32),
    Float(f32),
    Str(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// A sequence of `n` copies of `value`.
    pub fn seq_of(value: Value, n: usize) -> Value {
        Value::Seq(vec![value; n])
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Value::UInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Ordered key components from the root of a record to a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(parts.into_iter().map(Into::into).collect())
    }

    pub fn root() -> Self {
        Path(Vec::new())
    }

    /// Parse a dotted topic suffix (`k1.k2.k3`) back into a path.
    pub fn from_dotted(s: &str) -> Self {
        if s.is_empty() {
            return Path::root();
        }
        Path(s.split('.').map(str::to_owned).collect())
    }

    /// The dotted topic suffix for this path.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one trailing component.
    pub fn child(&self, key: &str) -> Path {
        let mut parts = self.0.clone();
        parts.push(key.to_owned());
        Path(parts)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Flat projection of a nested record: leaf path -> leaf value.
pub type FlatMap = BTreeMap<Path, Value>;

/// Flatten a record into its leaf map.
///
/// Only maps are recursed into; every other value (including sequences) is a
/// leaf. A non-map root produces a single entry at the empty path.
pub fn flatten(root: &Value) -> FlatMap {
    let mut flat = FlatMap::new();
    flatten_into(&mut flat, &mut Vec::new(), root);
    flat
}

fn flatten_into(flat: &mut FlatMap, prefix: &mut Vec<String>, value: &Value) {
    match value {
        Value::Map(entries) => {
            for (key, child) in entries {
                prefix.push(key.clone());
                flatten_into(flat, prefix, child);
                prefix.pop();
            }
        }
        leaf => {
            flat.insert(Path(prefix.clone()), leaf.clone());
        }
    }
}

/// Rebuild the nested record from a flat map, creating interior maps along
/// each path. Inverse of [`flatten`] for any record with no empty interior
/// maps: `unflatten(&flatten(x)) == x`.
pub fn unflatten(flat: &FlatMap) -> Value {
    let mut root = Value::Map(BTreeMap::new());
    for (path, value) in flat {
        set_path(&mut root, path, value.clone());
    }
    root
}

/// Fetch the value at `path`, descending through maps.
pub fn get_path<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut node = root;
    for key in &path.0 {
        node = node.as_map()?.get(key)?;
    }
    Some(node)
}

/// Store `value` at `path`, creating interior maps as needed. An empty path
/// replaces the root.
pub fn set_path(root: &mut Value, path: &Path, value: Value) {
    let Some((last, interior)) = path.0.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for key in interior {
        if !matches!(node, Value::Map(_)) {
            // A leaf sits where the path expects a map; replace it.
            *node = Value::Map(BTreeMap::new());
        }
        let Value::Map(entries) = node else {
            unreachable!()
        };
        node = entries
            .entry(key.clone())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
    }
    if !matches!(node, Value::Map(_)) {
        *node = Value::Map(BTreeMap::new());
    }
    let Value::Map(entries) = node else {
        unreachable!()
    };
    entries.insert(last.clone(), value);
}

/// Structural type match of `value` against `template`, at every level.
///
/// - Primitives: same variant.
/// - Sequences: same length and pairwise match of elements.
/// - Maps: identical key set and pairwise match of values.
pub fn match_type(value: &Value, template: &Value) -> bool {
    match (value, template) {
        (Value::Bool(_), Value::Bool(_))
        | (Value::UInt(_), Value::UInt(_))
        | (Value::Float(_), Value::Float(_))
        | (Value::Str(_), Value::Str(_)) => true,
        (Value::Seq(a), Value::Seq(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| match_type(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.keys().eq(b.keys())
                && a.iter().all(|(k, v)| match_type(v, &b[k]))
        }
        _ => false,
    }
}
