//! Runtime values
//!
//! A single tagged enum covers every value the language can produce.
//! Containers (arrays, objects) have shared ownership: binding one to a
//! new name shares the underlying storage, and only the `copy`/`fill`
//! built-ins clone. Functions carry the scope they closed over as an
//! arena handle.

use std::cell::RefCell;
use std::rc::Rc;

use crate::eval::scope::ScopeId;
use crate::models::{Duration, Pitch, Position};
use crate::parse::ast::{Expr, Param, Stmt};

/// A runtime value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Pitch(Pitch),
    Dur(Duration),
    Time(Position),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectMap>>),
    Function(Rc<FunctionValue>),
}

/// Insertion-ordered string→value mapping backing object values
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectMap {
    entries: Vec<(String, Value)>,
}

impl ObjectMap {
    pub fn new() -> ObjectMap {
        ObjectMap { entries: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, preserving first-insertion order
    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A user function or clip body with its closure scope
#[derive(Debug, PartialEq)]
pub struct FunctionValue {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: FnBody,
    pub closure: ScopeId,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FnBody {
    Block(Vec<Stmt>),
    Expr(Expr),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: ObjectMap) -> Value {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// Kind name used in type-error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Pitch(_) => "pitch",
            Value::Dur(_) => "dur",
            Value::Time(_) => "time",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Structural equality for scalars and musical values; identity for
    /// containers; functions are never equal
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Pitch(a), Value::Pitch(b)) => a == b,
            (Value::Dur(a), Value::Dur(b)) => durations_eq(a, b),
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(_), Value::Function(_)) => false,
            _ => false,
        }
    }

    /// Recursive clone of containers; scalars and functions copy as-is
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(items) => {
                let cloned = items.borrow().iter().map(Value::deep_clone).collect();
                Value::array(cloned)
            }
            Value::Object(map) => {
                let mut cloned = ObjectMap::new();
                for (k, v) in &map.borrow().entries {
                    cloned.entries.push((k.clone(), v.deep_clone()));
                }
                Value::object(cloned)
            }
            other => other.clone(),
        }
    }

    /// Shallow clone: a new container sharing element values
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Array(items) => Value::array(items.borrow().clone()),
            Value::Object(map) => Value::object(map.borrow().clone()),
            other => other.clone(),
        }
    }

    /// Lossy JSON rendering for annotation payloads in the Song-IR
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Null => serde_json::Value::Null,
            Value::Pitch(p) => serde_json::Value::from(p.key()),
            Value::Dur(d) => serde_json::Value::String(d.to_string()),
            Value::Time(t) => serde_json::Value::String(t.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.borrow().iter().map(Value::to_json).collect())
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in &map.borrow().entries {
                    out.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(out)
            }
            Value::Function(_) => serde_json::Value::Null,
        }
    }

    /// Human-readable rendering used by templates and string concatenation
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{:.1}", v)
                } else {
                    v.to_string()
                }
            }
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Pitch(p) => p.to_string(),
            Value::Dur(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::Array(items) => {
                let inner: Vec<String> =
                    items.borrow().iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Object(map) => {
                let inner: Vec<String> = map
                    .borrow()
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_display_string()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Function(f) => match &f.name {
                Some(name) => format!("<fn {}>", name),
                None => "<fn>".to_string(),
            },
        }
    }
}

/// Durations compare by exact length; fractional and tick-based
/// durations are never equal to each other
fn durations_eq(a: &Duration, b: &Duration) -> bool {
    match (a, b) {
        (Duration::Ticks { ticks: x }, Duration::Ticks { ticks: y }) => x == y,
        (Duration::Fraction { .. }, Duration::Fraction { .. }) => {
            // compare with dots expanded (1/4 dotted == 3/8); a PPQ of 512
            // keeps every legal denominator/dot combination exact
            a.to_ticks(512, &[]) == b.to_ticks(512, &[])
        }
        _ => false,
    }
}
