use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::types::Type;

/// Runtime value bound in a scope.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Array(ArrayValue),
    Object(ObjectValue),
}

/// Array value, elements are shared between copies.
#[derive(Clone)]
pub struct ArrayValue {
    pub elem: Type,
    pub items: Arc<Vec<Value>>,
}

/// Opaque instance of the program under test.
#[derive(Clone)]
pub struct ObjectValue {
    class: Box<str>,
    /// Class can not be named from outside, its type is not observable.
    anonymous: bool,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ObjectValue {
    pub fn new<T: AsRef<str>>(class: T, inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            class: crate::utils::to_boxed_str(class),
            anonymous: false,
            inner,
        }
    }

    pub fn anonymous(inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            class: "".into(),
            anonymous: true,
            inner,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Identity of the instance, stable while it is alive.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const u8 as usize
    }
}

impl Value {
    pub fn array(elem: Type, items: Vec<Value>) -> Self {
        Value::Array(ArrayValue {
            elem,
            items: Arc::new(items),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Concrete runtime type if it can be observed safely.
    pub fn runtime_type(&self) -> Option<Type> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(Type::Bool),
            Value::Int(_) => Some(Type::Int),
            Value::Float(_) => Some(Type::Float),
            Value::Str(_) => Some(Type::Str),
            Value::Array(a) => Some(Type::array_of(a.elem.clone())),
            Value::Object(o) if o.anonymous => None,
            Value::Object(o) => Some(Type::class(&o.class)),
        }
    }

    /// Identity used by reference comparisons, `None` for null and primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(o) => Some(o.identity()),
            Value::Array(a) => Some(Arc::as_ptr(&a.items) as usize),
            Value::Str(s) => Some(s.as_ptr() as usize),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Per-dimension lengths, walking the first element of every level.
    pub fn array_lengths(&self) -> Vec<usize> {
        let mut lens = Vec::new();
        let mut cur = self;
        while let Value::Array(a) = cur {
            lens.push(a.items.len());
            match a.items.first() {
                Some(first) => cur = first,
                None => break,
            }
        }
        lens
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Array(a) => f.debug_list().entries(a.items.iter()).finish(),
            Value::Object(o) if o.anonymous => write!(f, "<anonymous>@{:x}", o.identity()),
            Value::Object(o) => write!(f, "{}@{:x}", o.class, o.identity()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}
