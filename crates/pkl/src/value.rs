use std::{
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::Arc,
};

use indexmap::{IndexMap, IndexSet};

use crate::{
    class::{ClassInfo, TypeAliasInfo},
    cst::{NodeId, Param, Tree},
    object::{Env, ObjRef, Receivers},
    types::{format_number, DataSize, Duration, IntSeq},
};

/// Ordered map / set aliases used for Pkl `Map` and `Set` values and
/// for object entry tables.
pub(crate) type ValueMap = IndexMap<Value, Value, ahash::RandomState>;
pub(crate) type ValueSet = IndexSet<Value, ahash::RandomState>;

/// A compiled regular expression value.
#[derive(Debug)]
pub(crate) struct RegexValue {
    pub pattern: String,
    pub regex: regex::Regex,
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// `Pair(a, b)`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pair {
    pub first: Value,
    pub second: Value,
}

/// A function literal closed over its defining environment and
/// receiver chain. Non-exportable.
#[derive(Debug)]
pub(crate) struct FunctionValue {
    pub params: Vec<Param>,
    pub body: NodeId,
    pub tree: Arc<Tree>,
    pub env: Env,
    pub receivers: Receivers,
}

/// Primary runtime value type.
///
/// Scalars are stored inline; aggregates share structure through `Rc`
/// (evaluation is single-threaded, and everything an evaluator builds
/// is dropped with it). Object equality here is reference identity —
/// structural (PCF) equality forces members and therefore lives in the
/// evaluator.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Duration(Duration),
    DataSize(DataSize),
    Pair(Rc<Pair>),
    Regex(Rc<RegexValue>),
    Bytes(Rc<[u8]>),
    /// Lazy integer sequence; non-exportable.
    IntSeq(IntSeq),
    List(Rc<Vec<Value>>),
    Set(Rc<ValueSet>),
    Map(Rc<ValueMap>),
    /// Non-exportable closure.
    Function(Rc<FunctionValue>),
    Class(Rc<ClassInfo>),
    TypeAlias(Rc<TypeAliasInfo>),
    Object(ObjRef),
}

impl Value {
    pub fn string(text: impl Into<Rc<str>>) -> Self {
        Self::Str(text.into())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The user-facing type name, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "Null".to_owned(),
            Self::Bool(_) => "Boolean".to_owned(),
            Self::Int(_) => "Int".to_owned(),
            Self::Float(_) => "Float".to_owned(),
            Self::Str(_) => "String".to_owned(),
            Self::Duration(_) => "Duration".to_owned(),
            Self::DataSize(_) => "DataSize".to_owned(),
            Self::Pair(_) => "Pair".to_owned(),
            Self::Regex(_) => "Regex".to_owned(),
            Self::Bytes(_) => "Bytes".to_owned(),
            Self::IntSeq(_) => "IntSeq".to_owned(),
            Self::List(_) => "List".to_owned(),
            Self::Set(_) => "Set".to_owned(),
            Self::Map(_) => "Map".to_owned(),
            Self::Function(_) => "Function".to_owned(),
            Self::Class(_) => "Class".to_owned(),
            Self::TypeAlias(_) => "TypeAlias".to_owned(),
            Self::Object(obj) => obj.class.name.clone(),
        }
    }

    /// Renders scalar values without evaluator involvement; aggregates
    /// (which may force lazy members) return `None` and are handled by
    /// the evaluator's `toString`.
    #[must_use]
    pub fn display_scalar(&self) -> Option<String> {
        match self {
            Self::Null => Some("null".to_owned()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_number(*f)),
            Self::Str(s) => Some(s.to_string()),
            Self::Duration(d) => Some(d.to_string()),
            Self::DataSize(d) => Some(d.to_string()),
            Self::Regex(r) => Some(r.pattern.clone()),
            Self::IntSeq(s) => Some(s.to_string()),
            _ => None,
        }
    }

    /// Truthiness is strict: only booleans drive conditions.
    pub(crate) fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::DataSize(a), Self::DataSize(b)) => a == b,
            (Self::Pair(a), Self::Pair(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::IntSeq(a), Self::IntSeq(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::TypeAlias(a), Self::TypeAlias(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// NaN-valued floats break reflexivity, as they do for `f64` itself;
// such keys simply never match on lookup.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Self::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Self::Float(f) => {
                // Integral floats hash like the equal Int.
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e18 {
                    state.write_u8(2);
                    #[expect(clippy::cast_possible_truncation, reason = "integrality checked above")]
                    (*f as i64).hash(state);
                } else {
                    state.write_u8(3);
                    f.to_bits().hash(state);
                }
            }
            Self::Str(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Self::Duration(d) => {
                state.write_u8(5);
                d.in_seconds().to_bits().hash(state);
            }
            Self::DataSize(d) => {
                state.write_u8(6);
                d.in_bytes().to_bits().hash(state);
            }
            Self::Pair(p) => {
                state.write_u8(7);
                p.first.hash(state);
                p.second.hash(state);
            }
            Self::Regex(r) => {
                state.write_u8(8);
                r.pattern.hash(state);
            }
            Self::Bytes(b) => {
                state.write_u8(9);
                b.hash(state);
            }
            Self::IntSeq(s) => {
                state.write_u8(10);
                s.hash(state);
            }
            Self::List(l) => {
                state.write_u8(11);
                state.write_usize(l.len());
                for v in l.iter() {
                    v.hash(state);
                }
            }
            // Sets and maps compare order-insensitively, so only the
            // length feeds the hash.
            Self::Set(s) => {
                state.write_u8(12);
                state.write_usize(s.len());
            }
            Self::Map(m) => {
                state.write_u8(13);
                state.write_usize(m.len());
            }
            Self::Function(_) => state.write_u8(14),
            Self::Class(c) => {
                state.write_u8(15);
                c.name.hash(state);
            }
            Self::TypeAlias(t) => {
                state.write_u8(16);
                t.name.hash(state);
            }
            Self::Object(o) => {
                state.write_u8(17);
                o.class.name.hash(state);
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

/// A fully materialized value at the host API boundary.
///
/// Lazy members are forced during export; `Mapping` exports as `Map`
/// and `Listing` as `List`. `IntSeq` and `Function` are non-exportable
/// and exporting them is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Exported {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Duration(Duration),
    DataSize(DataSize),
    Pair(Box<(Exported, Exported)>),
    /// The regex pattern text.
    Regex(String),
    Bytes(Vec<u8>),
    List(Vec<Exported>),
    Set(Vec<Exported>),
    Map(Vec<(Exported, Exported)>),
    /// A `Typed`, `Dynamic`, or `Module` object.
    Object {
        class_name: String,
        properties: Vec<(String, Exported)>,
        elements: Vec<Exported>,
        entries: Vec<(Exported, Exported)>,
    },
    /// A class descriptor (name only; not reconstructible).
    Class(String),
    /// A type-alias descriptor (name only; not reconstructible).
    TypeAlias(String),
}

impl Exported {
    pub fn string(text: impl Into<String>) -> Self {
        Self::String(text.into())
    }

    /// The property value of an exported object, for test convenience.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Exported> {
        match self {
            Self::Object { properties, .. } => properties.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl fmt::Display for Exported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_number(*v)),
            Self::String(s) => f.write_str(s),
            Self::Duration(d) => write!(f, "{d}"),
            Self::DataSize(d) => write!(f, "{d}"),
            Self::Pair(p) => write!(f, "Pair({}, {})", p.0, p.1),
            Self::Regex(p) => write!(f, "Regex({p})"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::List(items) | Self::Set(items) => {
                write!(f, "({} items)", items.len())
            }
            Self::Map(entries) => write!(f, "({} entries)", entries.len()),
            Self::Object { class_name, .. } => write!(f, "new {class_name} {{ \u{2026} }}"),
            Self::Class(name) => write!(f, "Class({name})"),
            Self::TypeAlias(name) => write!(f, "TypeAlias({name})"),
        }
    }
}
