//! Branch distances of predicate evaluations.
//!
//! Every evaluation yields a pair of non-negative distances, one per outcome.
//! A distance of 0 means the outcome was taken, otherwise the distance grows
//! with how far the operands are from the boundary that flips the outcome.

/// Identity of a reference operand, `None` for null.
pub type Identity = Option<usize>;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One evaluated predicate together with its runtime operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Predicate {
    /// `x <op> 0`
    Zero(Cmp, i64),
    /// `a <op> b`
    Int(Cmp, i64, i64),
    /// `a == b` on references.
    SameRef(Identity, Identity),
    /// `a != b` on references.
    DifferentRef(Identity, Identity),
    /// `x == null`, the operand tells whether x is null.
    IsNull(bool),
    /// `x != null`, the operand tells whether x is null.
    NonNull(bool),
}

/// Distances of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchDistance {
    pub true_distance: f64,
    pub false_distance: f64,
}

impl BranchDistance {
    pub const fn new(true_distance: f64, false_distance: f64) -> Self {
        Self {
            true_distance,
            false_distance,
        }
    }

    /// Outcome the evaluation actually took.
    #[inline]
    pub fn outcome(&self) -> bool {
        self.true_distance == 0.0
    }

    /// Whether any of the two distances carries more than a boolean signal.
    #[inline]
    pub fn has_gradient(&self) -> bool {
        !is_boolean(self.true_distance) || !is_boolean(self.false_distance)
    }

    fn of_bool(outcome: bool) -> Self {
        if outcome {
            Self::new(0.0, 1.0)
        } else {
            Self::new(1.0, 0.0)
        }
    }
}

#[inline]
fn is_boolean(d: f64) -> bool {
    d == 0.0 || d == 1.0
}

impl Predicate {
    /// Compute the distances of this evaluation.
    pub fn distance(&self) -> BranchDistance {
        match *self {
            Predicate::Zero(cmp, x) => against_zero(cmp, x as f64),
            // difference is taken in f64, i64 subtraction may overflow.
            Predicate::Int(cmp, a, b) => against_zero(cmp, a as f64 - b as f64),
            Predicate::SameRef(a, b) => BranchDistance::of_bool(a == b),
            Predicate::DifferentRef(a, b) => BranchDistance::of_bool(a != b),
            Predicate::IsNull(null) => BranchDistance::of_bool(null),
            Predicate::NonNull(null) => BranchDistance::of_bool(!null),
        }
    }
}

fn against_zero(cmp: Cmp, v: f64) -> BranchDistance {
    let (t, f) = match cmp {
        Cmp::Eq => {
            let t = v.abs();
            (t, if t == 0.0 { 1.0 } else { 0.0 })
        }
        Cmp::Ne => {
            let f = v.abs();
            (if f == 0.0 { 1.0 } else { 0.0 }, f)
        }
        Cmp::Lt => (
            if v >= 0.0 { v + 1.0 } else { 0.0 },
            if v < 0.0 { -v + 1.0 } else { 0.0 },
        ),
        Cmp::Gt => (
            if v <= 0.0 { -v + 1.0 } else { 0.0 },
            if v > 0.0 { v + 1.0 } else { 0.0 },
        ),
        Cmp::Ge => (
            if v < 0.0 { -v + 1.0 } else { 0.0 },
            if v >= 0.0 { v + 1.0 } else { 0.0 },
        ),
        Cmp::Le => (
            if v > 0.0 { v + 1.0 } else { 0.0 },
            if v <= 0.0 { -v + 1.0 } else { 0.0 },
        ),
    };
    BranchDistance::new(t, f)
}
