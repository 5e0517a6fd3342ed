use rustc_hash::FxHashMap;
use thiserror::Error;

use super::types::Type;
use super::value::Value;

/// Symbolic variable of a test, identified by the position that defines it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarRef {
    index: usize,
    ty: Type,
}

impl VarRef {
    pub fn new(index: usize, ty: Type) -> Self {
        Self { index, ty }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Declared type.
    pub fn ty(&self) -> &Type {
        &self.ty
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScopeError {
    #[error("variable v{0} is not bound")]
    Unbound(usize),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    /// Declared type, possibly narrowed to the first observed runtime type.
    ty: Type,
    /// Per-dimension lengths of array values.
    lengths: Option<Vec<usize>>,
}

/// Live variable bindings of one execution.
#[derive(Debug, Default)]
pub struct Scope {
    slots: FxHashMap<usize, Slot>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to `var`.
    ///
    /// A still generic type of the handle is narrowed to the value's runtime
    /// type when that type can be observed, a narrowed type is never widened
    /// again.
    pub fn bind(&mut self, var: &VarRef, value: Value) {
        let lengths = match value {
            Value::Array(_) => Some(value.array_lengths()),
            _ => None,
        };
        let slot = self.slots.entry(var.index).or_insert_with(|| Slot {
            value: Value::Null,
            ty: var.ty.clone(),
            lengths: None,
        });
        if slot.ty.is_generic() {
            if let Some(rt) = value.runtime_type() {
                if !rt.is_generic() && slot.ty.is_assignable_from(&rt) {
                    log::trace!("narrowing v{} from {} to {}", var.index, slot.ty, rt);
                    slot.ty = rt;
                }
            }
        }
        slot.value = value;
        slot.lengths = lengths;
    }

    pub fn read(&self, var: &VarRef) -> Result<&Value, ScopeError> {
        self.slots
            .get(&var.index)
            .map(|s| &s.value)
            .ok_or(ScopeError::Unbound(var.index))
    }

    pub fn contains(&self, var: &VarRef) -> bool {
        self.slots.contains_key(&var.index)
    }

    /// Effective type of a bound handle.
    pub fn effective_type(&self, var: &VarRef) -> Option<&Type> {
        self.slots.get(&var.index).map(|s| &s.ty)
    }

    pub fn array_lengths(&self, var: &VarRef) -> Option<&[usize]> {
        self.slots
            .get(&var.index)
            .and_then(|s| s.lengths.as_deref())
    }

    /// Bound handles whose effective type can be stored in `ty`, in definition order.
    pub fn values_of_type(&self, ty: &Type) -> Vec<VarRef> {
        let mut vars = self
            .slots
            .iter()
            .filter(|(_, s)| ty.is_assignable_from(&s.ty))
            .map(|(&index, s)| VarRef::new(index, s.ty.clone()))
            .collect::<Vec<_>>();
        vars.sort_unstable_by_key(|v| v.index);
        vars
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
