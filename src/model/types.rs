use std::fmt;

/// Static type of a variable handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Unbound type variable or wildcard.
    Var(Box<str>),
    Bool,
    Int,
    Float,
    Str,
    /// Named class type.
    Class(Box<str>),
    Array(Box<Type>),
}

impl Type {
    pub fn var<T: AsRef<str>>(name: T) -> Self {
        Type::Var(crate::utils::to_boxed_str(name))
    }

    pub fn class<T: AsRef<str>>(name: T) -> Self {
        Type::Class(crate::utils::to_boxed_str(name))
    }

    pub fn array_of(elem: Type) -> Self {
        Type::Array(Box::new(elem))
    }

    /// Type still mentions an unbound type variable.
    pub fn is_generic(&self) -> bool {
        match self {
            Type::Var(_) => true,
            Type::Array(elem) => elem.is_generic(),
            _ => false,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    /// Number of array dimensions.
    pub fn dims(&self) -> usize {
        match self {
            Type::Array(elem) => 1 + elem.dims(),
            _ => 0,
        }
    }

    /// Whether a value of type `other` can be stored in a variable of this type.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Var(_), _) => true,
            (Type::Float, Type::Int) => true,
            (Type::Array(a), Type::Array(b)) => a.is_assignable_from(b),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Var(name) => write!(f, "{}", name),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "string"),
            Type::Class(name) => write!(f, "{}", name),
            Type::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}
