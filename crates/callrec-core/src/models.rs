//! Shared typed models used across recording, catalog, synthesis, and
//! execution layers.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 1. CallSite
// ---------------------------------------------------------------------------

/// A syntactic call location: the originating unit plus the site's in-unit id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub unit: String,
    pub site_id: u64,
}

impl CallSite {
    pub fn new(unit: impl Into<String>, site_id: u64) -> Self {
        Self {
            unit: unit.into(),
            site_id,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Value (captured payload model)
// ---------------------------------------------------------------------------

/// A self-describing captured value.
///
/// Every node is tagged on disk (`{"kind": ..., "value": ...}`) so a blob can
/// be decoded without access to the process that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range, kept as their decimal text.
    BigInt(String),
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    Bytes(#[serde(with = "hex_repr")] Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    /// Ordered key/value pairs; keys are arbitrary values.
    Dict(Vec<(Value, Value)>),
    Object(ObjectValue),
    /// A value the host could not describe. Never encodable.
    Opaque { type_name: String },
}

/// An instance of a user-defined type, described through its fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub module: String,
    pub type_name: String,
    pub fields: IndexMap<String, Value>,
    /// Whether the type defines its own equality operation.
    pub defines_eq: bool,
}

impl ObjectValue {
    pub fn new(module: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            type_name: type_name.into(),
            fields: IndexMap::new(),
            defines_eq: false,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_equality(mut self, defines_eq: bool) -> Self {
        self.defines_eq = defines_eq;
        self
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// True for instances whose type offers no equality of its own, which
    /// therefore cannot be compared with `==` in a synthesized test.
    pub fn needs_structural_comparison(&self) -> bool {
        matches!(self, Value::Object(obj) if !obj.defines_eq)
    }

    /// Type name of the first opaque node found, depth first.
    pub fn find_opaque(&self) -> Option<&str> {
        match self {
            Value::Opaque { type_name } => Some(type_name),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                items.iter().find_map(Value::find_opaque)
            }
            Value::Dict(pairs) => pairs
                .iter()
                .find_map(|(k, v)| k.find_opaque().or_else(|| v.find_opaque())),
            Value::Object(obj) => obj.fields.values().find_map(Value::find_opaque),
            _ => None,
        }
    }
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("nan")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => match text.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float literal {other:?}"))),
            },
        }
    }
}

mod hex_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// 3. Capture (opt-in payload description for Rust hosts)
// ---------------------------------------------------------------------------

/// Describes a host value as a [`Value`].
///
/// User-defined types opt in by returning a [`Value::Object`] listing their
/// fields; there is no reflective fallback.
pub trait Capture {
    fn capture(&self) -> Value;
}

impl Capture for Value {
    fn capture(&self) -> Value {
        self.clone()
    }
}

impl Capture for bool {
    fn capture(&self) -> Value {
        Value::Bool(*self)
    }
}

impl Capture for i32 {
    fn capture(&self) -> Value {
        Value::Int(i64::from(*self))
    }
}

impl Capture for i64 {
    fn capture(&self) -> Value {
        Value::Int(*self)
    }
}

impl Capture for u32 {
    fn capture(&self) -> Value {
        Value::Int(i64::from(*self))
    }
}

impl Capture for u64 {
    fn capture(&self) -> Value {
        match i64::try_from(*self) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::BigInt(self.to_string()),
        }
    }
}

impl Capture for f64 {
    fn capture(&self) -> Value {
        Value::Float(*self)
    }
}

impl Capture for str {
    fn capture(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl Capture for String {
    fn capture(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl<T: Capture> Capture for Option<T> {
    fn capture(&self) -> Value {
        match self {
            Some(v) => v.capture(),
            None => Value::None,
        }
    }
}

impl<T: Capture> Capture for Vec<T> {
    fn capture(&self) -> Value {
        Value::List(self.iter().map(Capture::capture).collect())
    }
}

impl<A: Capture, B: Capture> Capture for (A, B) {
    fn capture(&self) -> Value {
        Value::Tuple(vec![self.0.capture(), self.1.capture()])
    }
}

impl<A: Capture, B: Capture, C: Capture> Capture for (A, B, C) {
    fn capture(&self) -> Value {
        Value::Tuple(vec![self.0.capture(), self.1.capture(), self.2.capture()])
    }
}

impl<K: Capture, V: Capture> Capture for IndexMap<K, V> {
    fn capture(&self) -> Value {
        Value::Dict(
            self.iter()
                .map(|(k, v)| (k.capture(), v.capture()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// 4. Callable (closed variant set handed over by the instrumentation host)
// ---------------------------------------------------------------------------

/// How a callable relates to the module that defines it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleLink {
    /// The callable is its own defining module.
    Itself,
    Named(String),
    /// The defining module exists but its name could not be read.
    Unresolved,
}

/// Where a callable lives. Every field is best effort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    pub module: ModuleLink,
    pub file: Option<String>,
}

impl Origin {
    pub fn new(module: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            module: ModuleLink::Named(module.into()),
            file: Some(file.into()),
        }
    }

    pub fn unknown() -> Self {
        Self {
            module: ModuleLink::Unresolved,
            file: None,
        }
    }
}

/// A called object as described by the instrumentation host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callable {
    /// A free function or a function reached through a class (static method);
    /// `qualname` is its dotted lexical path.
    Function {
        name: Option<String>,
        qualname: Option<String>,
        origin: Origin,
    },
    /// A class object called as a constructor.
    Class {
        name: Option<String>,
        qualname: Option<String>,
        origin: Origin,
    },
    /// A method bound to a type receiver (class method).
    ClassBound {
        name: Option<String>,
        owner: Option<String>,
        origin: Origin,
    },
    /// A method bound to an ordinary instance. Never reconstructible.
    InstanceBound {
        name: Option<String>,
        origin: Origin,
    },
}

impl Callable {
    pub fn function(name: &str, qualname: &str, origin: Origin) -> Self {
        Callable::Function {
            name: Some(name.to_string()),
            qualname: Some(qualname.to_string()),
            origin,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Callable::Function { name, .. }
            | Callable::Class { name, .. }
            | Callable::ClassBound { name, .. }
            | Callable::InstanceBound { name, .. } => name.as_deref(),
        }
    }

    pub fn origin(&self) -> &Origin {
        match self {
            Callable::Function { origin, .. }
            | Callable::Class { origin, .. }
            | Callable::ClassBound { origin, .. }
            | Callable::InstanceBound { origin, .. } => origin,
        }
    }
}

// ---------------------------------------------------------------------------
// 5. ResolvedIdentity
// ---------------------------------------------------------------------------

/// The reconstructable identity of a callable. Absent fields mean resolution
/// failed for that part.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub symbol_name: Option<String>,
    pub owner_type_name: Option<String>,
    pub import_expression: Option<String>,
}

impl ResolvedIdentity {
    /// The name the import expression binds: the owner type when present,
    /// otherwise the symbol itself.
    pub fn binding_name(&self) -> Option<&str> {
        self.owner_type_name
            .as_deref()
            .or(self.symbol_name.as_deref())
    }
}

// ---------------------------------------------------------------------------
// 6. CapturedCall
// ---------------------------------------------------------------------------

/// One persisted capture. Immutable once its catalog record is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedCall {
    pub sequence: u64,
    pub call_site: CallSite,
    pub identity: ResolvedIdentity,
    pub args_blob_path: PathBuf,
    pub result_blob_path: PathBuf,
    pub meta_path: PathBuf,
}
