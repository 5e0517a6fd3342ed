use std::fmt;

/// Stable id of a branch, assigned by static analysis.
pub type BranchId = u32;

/// Activation record of one method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub class_name: Box<str>,
    pub method_name: Box<str>,
    /// Unique id of this call inside its trace.
    pub call_id: u32,
    /// Registered id of the receiver object, 0 for static calls.
    pub calling_object: u32,
    /// Stack depth at the time the call was entered.
    pub depth: usize,
    pub line_trace: Vec<u32>,
    /// Evaluated branches, `None` marks a synthetic entry evaluation.
    pub branch_trace: Vec<Option<BranchId>>,
    pub true_distance_trace: Vec<f64>,
    pub false_distance_trace: Vec<f64>,
    pub du_counter_trace: Vec<u32>,
}

impl MethodCall {
    pub fn new(
        class_name: Box<str>,
        method_name: Box<str>,
        call_id: u32,
        calling_object: u32,
        depth: usize,
    ) -> Self {
        Self {
            class_name,
            method_name,
            call_id,
            calling_object,
            depth,
            line_trace: Vec::new(),
            branch_trace: Vec::new(),
            true_distance_trace: Vec::new(),
            false_distance_trace: Vec::new(),
            du_counter_trace: Vec::new(),
        }
    }

    /// Bottom frame of every trace.
    pub(crate) fn main() -> Self {
        Self::new("".into(), "".into(), 0, 0, 0)
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.method_name.is_empty()
    }

    pub(crate) fn push_eval(
        &mut self,
        branch: Option<BranchId>,
        true_distance: f64,
        false_distance: f64,
        du_counter: u32,
    ) {
        self.branch_trace.push(branch);
        self.true_distance_trace.push(true_distance);
        self.false_distance_trace.push(false_distance);
        self.du_counter_trace.push(du_counter);
    }

    /// Number of recorded evaluations.
    #[inline]
    pub fn evals(&self) -> usize {
        self.branch_trace.len()
    }

    /// All evaluation sequences have the same length.
    pub fn is_sane(&self) -> bool {
        let n = self.branch_trace.len();
        self.true_distance_trace.len() == n
            && self.false_distance_trace.len() == n
            && self.du_counter_trace.len() == n
    }

    /// Drop the evaluations at the given sorted indices.
    pub(crate) fn remove_evals(&mut self, sorted: &[usize]) {
        for &i in sorted.iter().rev() {
            self.branch_trace.remove(i);
            self.true_distance_trace.remove(i);
            self.false_distance_trace.remove(i);
            self.du_counter_trace.remove(i);
        }
    }
}

impl fmt::Display for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.method_name)?;
        for ((b, t), fd) in self
            .branch_trace
            .iter()
            .zip(self.true_distance_trace.iter())
            .zip(self.false_distance_trace.iter())
        {
            match b {
                Some(b) => write!(f, "\n  {}: {}/{}", b, t, fd)?,
                None => write!(f, "\n  <entry>: {}/{}", t, fd)?,
            }
        }
        Ok(())
    }
}
