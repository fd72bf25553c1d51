//! Cache key construction
//!
//! A key is the SHA-256 of a canonical (sorted-keys) JSON payload:
//! `{"args": [...], "func": "...", "kwargs": {...}, "tag": ..., "v": "..."}`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use toolgate_foundation::{Error, Result};

/// Hex characters of the source hash kept in version strings
const FINGERPRINT_LEN: usize = 12;

// ============================================================================
// FunctionId
// ============================================================================

/// Identity of a wrapped function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionId {
    qualified_name: String,
    source: Option<&'static str>,
}

impl FunctionId {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            source: None,
        }
    }

    /// Identity with known source text, enabling fingerprinting on code changes
    pub fn with_source(qualified_name: impl Into<String>, source: &'static str) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            source: Some(source),
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn source(&self) -> Option<&'static str> {
        self.source
    }

    /// Fingerprint of the source, or of the name when no source is known
    pub fn fingerprint(&self) -> String {
        match self.source {
            Some(source) => fingerprint(source),
            None => fingerprint(&self.qualified_name),
        }
    }
}

/// Short SHA-256 fingerprint of a function's source text
pub fn fingerprint(source: &str) -> String {
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

/// `"{version}+{fingerprint}"` when fingerprinting, else `version`
pub fn version_string(cache_version: &str, include_fingerprint: bool, id: &FunctionId) -> String {
    if include_fingerprint {
        format!("{}+{}", cache_version, id.fingerprint())
    } else {
        cache_version.to_string()
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// One call argument
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Exact serde representation
    Json(Value),
    /// `Debug` rendering of a value serde could not represent
    Repr(String),
}

impl ArgValue {
    pub fn from_serialize<T: Serialize + Debug + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            // serde_json writes NaN and infinities as null
            Ok(Value::Null) => {
                let repr = format!("{:?}", value);
                if is_non_finite_repr(&repr) {
                    ArgValue::Repr(repr)
                } else {
                    ArgValue::Json(Value::Null)
                }
            }
            Ok(v) => ArgValue::Json(v),
            Err(_) => ArgValue::Repr(format!("{:?}", value)),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ArgValue::Json(v) => Some(v),
            ArgValue::Repr(_) => None,
        }
    }

    pub fn is_repr(&self) -> bool {
        matches!(self, ArgValue::Repr(_))
    }

    fn to_text(&self) -> String {
        match self {
            ArgValue::Json(v) => canonical_json(v),
            ArgValue::Repr(s) => s.clone(),
        }
    }

    fn decode<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        let value = self.as_json().ok_or_else(|| {
            Error::InvalidInput(format!("{} has no structured value", what))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("{} has the wrong type: {}", what, e)))
    }
}

/// `NaN`, `inf` or `-inf`, possibly inside `Some(..)`
fn is_non_finite_repr(repr: &str) -> bool {
    let mut inner = repr;
    while let Some(rest) = inner.strip_prefix("Some(").and_then(|r| r.strip_suffix(')')) {
        inner = rest;
    }
    matches!(inner, "NaN" | "inf" | "-inf")
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        ArgValue::Json(v)
    }
}

/// Positional and keyword arguments of one call.
///
/// Keyword order never matters: keywords are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<ArgValue>,
    keyword: BTreeMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + Debug + ?Sized>(mut self, value: &T) -> Self {
        self.positional.push(ArgValue::from_serialize(value));
        self
    }

    /// Set a keyword argument
    pub fn kwarg<T: Serialize + Debug + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.keyword.insert(name.into(), ArgValue::from_serialize(value));
        self
    }

    pub fn push(&mut self, value: ArgValue) {
        self.positional.push(value);
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        self.keyword.insert(name.into(), value);
    }

    /// Remove and return a keyword argument
    pub fn take(&mut self, name: &str) -> Option<ArgValue> {
        self.keyword.remove(name)
    }

    /// Build from JSON: an array gives positional arguments, an object
    /// gives keyword arguments, `null` gives none, anything else is one
    /// positional argument.
    pub fn from_json(value: Value) -> Self {
        let mut args = Self::new();
        match value {
            Value::Null => {}
            Value::Array(items) => {
                args.positional = items.into_iter().map(ArgValue::Json).collect();
            }
            Value::Object(map) => {
                args.keyword = map.into_iter().map(|(k, v)| (k, ArgValue::Json(v))).collect();
            }
            other => args.positional.push(ArgValue::Json(other)),
        }
        args
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn keywords(&self) -> &BTreeMap<String, ArgValue> {
        &self.keyword
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional argument `idx` decoded as `T`
    pub fn get<T: DeserializeOwned>(&self, idx: usize) -> Result<T> {
        let arg = self.positional.get(idx).ok_or_else(|| {
            Error::InvalidInput(format!("missing positional argument {}", idx))
        })?;
        arg.decode(&format!("argument {}", idx))
    }

    /// Keyword argument decoded as `T`, `None` when absent
    pub fn keyword<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.keyword
            .get(name)
            .map(|arg| arg.decode(&format!("keyword '{}'", name)))
            .transpose()
    }

    fn all_structured(&self) -> bool {
        !self.positional.iter().any(ArgValue::is_repr) && !self.keyword.values().any(ArgValue::is_repr)
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Custom key builder
pub type KeyFn = Arc<dyn Fn(&FunctionId, &CallArgs) -> String + Send + Sync>;

/// SHA-256 hex key for one call.
///
/// If any argument has no structured form, every argument is rendered as
/// text instead, so the key stays stable even though it is less exact.
pub fn default_key(id: &FunctionId, args: &CallArgs, version: &str, tag: Option<&str>) -> String {
    let (positional, keyword): (Vec<Value>, Map<String, Value>) = if args.all_structured() {
        (
            args.positional
                .iter()
                .filter_map(|a| a.as_json().cloned())
                .collect(),
            args.keyword
                .iter()
                .filter_map(|(k, a)| a.as_json().map(|v| (k.clone(), v.clone())))
                .collect(),
        )
    } else {
        (
            args.positional
                .iter()
                .map(|a| Value::String(a.to_text()))
                .collect(),
            args.keyword
                .iter()
                .map(|(k, a)| (k.clone(), Value::String(a.to_text())))
                .collect(),
        )
    };

    let mut payload = Map::new();
    payload.insert("args".into(), Value::Array(positional));
    payload.insert("func".into(), Value::String(id.qualified_name.clone()));
    payload.insert("kwargs".into(), Value::Object(keyword));
    payload.insert(
        "tag".into(),
        tag.map_or(Value::Null, |t| Value::String(t.to_string())),
    );
    payload.insert("v".into(), Value::String(version.to_string()));

    let text = canonical_json(&Value::Object(payload));
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Compact JSON with object keys sorted at every depth.
///
/// `Map` is a `BTreeMap` without serde_json's `preserve_order` feature, so
/// plain serialization already sorts keys.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}
