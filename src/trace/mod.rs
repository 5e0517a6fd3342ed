//! Execution trace of one test run.
//!
//! A `Trace` accumulates every signal the instrumentation reports while a
//! test runs: branch distances, line and method coverage, def/use
//! occurrences, mutant infection distances and the call frames these events
//! happened in. Traces share their data copy-on-write, duplicating one is
//! cheap until either side is mutated.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use thiserror::Error;

use crate::model::Fault;
use crate::utils::to_boxed_str;
use call::BranchId;
use context::CallContext;
use defuse::{DefUseId, DuTarget, OccurrenceTable, Occurrences};
use distance::{BranchDistance, Identity};

/// Method activation records.
pub mod call;
/// Call stack shapes used as coverage keys.
pub mod context;
/// Definition and use occurrences.
pub mod defuse;
/// Branch distance arithmetic.
pub mod distance;

pub use call::MethodCall;
pub use distance::{Cmp, Predicate};

/// Stable id of a mutant.
pub type MutantId = u32;

/// class -> method -> key -> count.
pub type CountTable<K> = FxHashMap<Box<str>, FxHashMap<Box<str>, FxHashMap<K, u32>>>;

/// Inconsistency of trace bookkeeping, the recorded data can no longer be trusted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TraceError {
    #[error("call stack underflow on exit of {class}.{method}")]
    CallStackUnderflow { class: Box<str>, method: Box<str> },
    #[error("unknown {kind} id {id}")]
    UnknownDefUse { kind: &'static str, id: DefUseId },
    #[error("invalid du counter range: start {start} > end {end}")]
    InvalidRange { start: u32, end: u32 },
}

/// What a trace records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConf {
    /// Maintain call frames, required by def/use and per-object views.
    pub trace_calls: bool,
    /// Maintain line, method and predicate counts.
    pub trace_coverage: bool,
    /// Maintain per call context distance and count maps.
    pub context: bool,
    /// Add a synthetic entry evaluation to every call frame.
    pub def_use_fake_entry: bool,
    /// Remember branches whose distances ever went beyond 0/1.
    pub gradient_branches: bool,
}

impl Default for TraceConf {
    fn default() -> Self {
        Self {
            trace_calls: true,
            trace_coverage: true,
            context: false,
            def_use_fake_entry: false,
            gradient_branches: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TraceData {
    conf: TraceConf,
    stack: Vec<MethodCall>,
    finished_calls: Vec<MethodCall>,
    method_id: u32,

    true_distances: FxHashMap<BranchId, f64>,
    false_distances: FxHashMap<BranchId, f64>,
    true_distances_sum: FxHashMap<BranchId, f64>,
    false_distances_sum: FxHashMap<BranchId, f64>,
    covered_predicates: FxHashMap<BranchId, u32>,
    covered_true: FxHashMap<BranchId, u32>,
    covered_false: FxHashMap<BranchId, u32>,
    gradient_branches: FxHashSet<BranchId>,

    true_distances_context: FxHashMap<BranchId, FxHashMap<CallContext, f64>>,
    false_distances_context: FxHashMap<BranchId, FxHashMap<CallContext, f64>>,
    predicate_context_count: FxHashMap<BranchId, FxHashMap<CallContext, u32>>,
    method_context_count: FxHashMap<Box<str>, FxHashMap<CallContext, u32>>,

    coverage: CountTable<u32>,
    return_data: CountTable<i64>,
    covered_methods: FxHashMap<Box<str>, u32>,
    covered_branchless_methods: FxHashMap<Box<str>, u32>,

    covered_defs: FxHashMap<DefUseId, u32>,
    passed_definitions: OccurrenceTable,
    passed_uses: OccurrenceTable,
    du_counter: u32,
    known_callers: FxHashMap<usize, u32>,
    object_counter: u32,

    mutant_distances: FxHashMap<MutantId, f64>,
    touched_mutants: FxHashSet<MutantId>,

    explicit_fault: Option<Arc<Fault>>,
    classes_with_static_reads: FxHashSet<Box<str>>,
    classes_with_static_writes: FxHashSet<Box<str>>,
    initialized_classes: Vec<Box<str>>,
}

/// Execution trace of one run.
///
/// `Clone` shares the underlying data, the first mutation of either copy
/// detaches it.
#[derive(Debug, Clone)]
pub struct Trace {
    data: Arc<TraceData>,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(TraceConf::default())
    }
}

fn inc<K: std::hash::Hash + Eq>(map: &mut FxHashMap<K, u32>, key: K) {
    *map.entry(key).or_insert(0) += 1;
}

fn fold_min<K: std::hash::Hash + Eq>(map: &mut FxHashMap<K, f64>, key: K, d: f64) {
    let e = map.entry(key).or_insert(d);
    if d < *e {
        *e = d;
    }
}

fn inc_nested<K: std::hash::Hash + Eq>(table: &mut CountTable<K>, class: &str, method: &str, key: K) {
    if !table.contains_key(class) {
        table.insert(to_boxed_str(class), FxHashMap::default());
    }
    if let Some(methods) = table.get_mut(class) {
        if !methods.contains_key(method) {
            methods.insert(to_boxed_str(method), FxHashMap::default());
        }
        if let Some(keys) = methods.get_mut(method) {
            inc(keys, key);
        }
    }
}

/// Hash a textual rendering of a returned object, identity suffixes like
/// `@1b6d3586` are stripped so equal values hash equally across runs.
pub fn hash_rendering(repr: &str) -> i64 {
    let mut h = FxHasher::default();
    let mut rest = repr;
    while let Some(at) = rest.find('@') {
        h.write(rest[..at].as_bytes());
        let tail = &rest[at + 1..];
        let hex = tail
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or_else(|| tail.len());
        if hex == 0 {
            h.write(b"@");
        }
        rest = &tail[hex..];
    }
    h.write(rest.as_bytes());
    h.finish() as i64
}

impl Trace {
    pub fn new(conf: TraceConf) -> Self {
        let data = TraceData {
            conf,
            stack: vec![MethodCall::main()],
            ..TraceData::default()
        };
        Self {
            data: Arc::new(data),
        }
    }

    #[inline]
    fn data_mut(&mut self) -> &mut TraceData {
        Arc::make_mut(&mut self.data)
    }

    pub fn conf(&self) -> TraceConf {
        self.data.conf
    }

    /// Drop everything recorded so far.
    pub fn clear(&mut self) {
        *self = Self::new(self.data.conf);
    }

    /// Cheap duplicate, shares data until one side is mutated.
    pub fn lazy_clone(&self) -> Self {
        self.clone()
    }

    /// Duplicate that owns its data right away.
    pub fn deep_clone(&self) -> Self {
        Self {
            data: Arc::new((*self.data).clone()),
        }
    }

    /// Whether this trace still shares data with another duplicate.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Record one predicate evaluation.
    pub fn branch_passed(&mut self, branch: BranchId, d: BranchDistance) {
        debug_assert!(d.true_distance >= 0.0 && d.false_distance >= 0.0);
        let data = self.data_mut();
        let conf = data.conf;

        if conf.trace_calls {
            let du = data.du_counter;
            if let Some(top) = data.stack.last_mut() {
                top.push_eval(Some(branch), d.true_distance, d.false_distance, du);
            }
        }

        fold_min(&mut data.true_distances, branch, d.true_distance);
        fold_min(&mut data.false_distances, branch, d.false_distance);
        *data.true_distances_sum.entry(branch).or_insert(0.0) += d.true_distance;
        *data.false_distances_sum.entry(branch).or_insert(0.0) += d.false_distance;

        if conf.gradient_branches && d.has_gradient() {
            data.gradient_branches.insert(branch);
        }

        if conf.trace_coverage {
            inc(&mut data.covered_predicates, branch);
            if d.true_distance == 0.0 {
                inc(&mut data.covered_true, branch);
            }
            if d.false_distance == 0.0 {
                inc(&mut data.covered_false, branch);
            }
        }

        if conf.context {
            let ctx = CallContext::of_stack(&data.stack);
            fold_min(
                data.true_distances_context.entry(branch).or_default(),
                ctx.clone(),
                d.true_distance,
            );
            fold_min(
                data.false_distances_context.entry(branch).or_default(),
                ctx.clone(),
                d.false_distance,
            );
            inc(data.predicate_context_count.entry(branch).or_default(), ctx);
        }
    }

    fn register_object(&mut self, caller: Identity) -> u32 {
        let caller = match caller {
            Some(c) => c,
            None => return 0,
        };
        let data = self.data_mut();
        if let Some(&id) = data.known_callers.get(&caller) {
            return id;
        }
        data.object_counter += 1;
        data.known_callers.insert(caller, data.object_counter);
        data.object_counter
    }

    /// Push a new call frame.
    pub fn entered_method(&mut self, class: &str, method: &str, caller: Identity, branchless: bool) {
        let conf = self.data.conf;
        if conf.trace_coverage {
            let id = format!("{}.{}", class, method).into_boxed_str();
            let data = self.data_mut();
            if branchless {
                inc(&mut data.covered_branchless_methods, id.clone());
            }
            inc(&mut data.covered_methods, id);
        }
        if class.is_empty() || method.is_empty() {
            return;
        }
        if conf.trace_calls {
            let object = self.register_object(caller);
            let data = self.data_mut();
            data.method_id += 1;
            let mut call = MethodCall::new(
                to_boxed_str(class),
                to_boxed_str(method),
                data.method_id,
                object,
                data.stack.len(),
            );
            if conf.def_use_fake_entry {
                call.push_eval(None, 1.0, 0.0, data.du_counter);
            }
            data.stack.push(call);
        }
        if conf.context {
            let data = self.data_mut();
            let ctx = CallContext::of_stack(&data.stack);
            let id = format!("{}.{}", class, method).into_boxed_str();
            inc(data.method_context_count.entry(id).or_default(), ctx);
        }
    }

    /// Pop the top call frame.
    ///
    /// A mismatching top frame is discarded, it was left open by an
    /// abnormal exit of a callee.
    pub fn exit_method(&mut self, class: &str, method: &str) -> Result<(), TraceError> {
        if class.is_empty() || method.is_empty() || !self.data.conf.trace_calls {
            return Ok(());
        }
        let data = self.data_mut();
        let top = data.stack.pop().ok_or_else(|| TraceError::CallStackUnderflow {
            class: to_boxed_str(class),
            method: to_boxed_str(method),
        })?;
        if &*top.method_name == method {
            data.finished_calls.push(top);
        } else if top.is_main() && top.evals() != 0 {
            log::debug!("exit of {}.{} reached the main frame", class, method);
            data.finished_calls.push(top);
        } else {
            log::debug!(
                "expecting exit of {}.{}, got {}.{}",
                top.class_name,
                top.method_name,
                class,
                method
            );
        }
        Ok(())
    }

    /// Record an executed line.
    pub fn line_passed(&mut self, class: &str, method: &str, line: u32) {
        let conf = self.data.conf;
        if conf.trace_calls {
            self.append_line(class, method, line);
        }
        if conf.trace_coverage {
            inc_nested(&mut self.data_mut().coverage, class, method, line);
        }
    }

    fn append_line(&mut self, class: &str, method: &str, line: u32) {
        let data = self.data_mut();
        let top_matches = match data.stack.last() {
            Some(top) => &*top.method_name == method,
            None => {
                log::debug!("call stack is empty at {}.{}:{}", class, method, line);
                return;
            }
        };
        if !top_matches {
            if data.stack.last().map_or(false, |t| t.is_main()) {
                return;
            }
            if data.stack.iter().any(|c| &*c.method_name == method) {
                // unwind frames left open by callees that never reported their exit.
                while let Some(top) = data.stack.last() {
                    if &*top.method_name == method || top.is_main() {
                        break;
                    }
                    log::debug!("popping {} while looking for {}", top.method_name, method);
                    if let Some(call) = data.stack.pop() {
                        data.finished_calls.push(call);
                    }
                }
            } else if let Some(call) = data.stack.pop() {
                log::warn!(
                    "popping {}.{} while looking for {}.{}",
                    call.class_name,
                    call.method_name,
                    class,
                    method
                );
                data.finished_calls.push(call);
            }
            if data.stack.is_empty() {
                log::warn!("call stack is empty at {}.{}:{}", class, method, line);
                return;
            }
        }
        if let Some(top) = data.stack.last_mut() {
            top.line_trace.push(line);
        }
    }

    pub fn return_value(&mut self, class: &str, method: &str, value: i64) {
        inc_nested(&mut self.data_mut().return_data, class, method, value);
    }

    pub fn definition_passed(&mut self, var: &str, is_static: bool, caller: Identity, id: DefUseId) {
        if !self.data.conf.trace_calls {
            return;
        }
        let mut object = self.register_object(caller);
        if is_static {
            object = 0;
        }
        let data = self.data_mut();
        inc(&mut data.covered_defs, id);
        defuse::record(&mut data.passed_definitions, var, object, data.du_counter, id);
        data.du_counter += 1;
    }

    pub fn use_passed(&mut self, var: &str, is_static: bool, caller: Identity, id: DefUseId) {
        if !self.data.conf.trace_calls {
            return;
        }
        let mut object = self.register_object(caller);
        if is_static {
            object = 0;
        }
        let data = self.data_mut();
        defuse::record(&mut data.passed_uses, var, object, data.du_counter, id);
        data.du_counter += 1;
    }

    pub fn mutation_passed(&mut self, mutant: MutantId, distance: f64) {
        let data = self.data_mut();
        data.touched_mutants.insert(mutant);
        fold_min(&mut data.mutant_distances, mutant, distance);
    }

    pub fn set_explicit_fault(&mut self, fault: Arc<Fault>) {
        self.data_mut().explicit_fault = Some(fault);
    }

    pub fn static_field_read(&mut self, class: &str) {
        if !self.data.classes_with_static_reads.contains(class) {
            self.data_mut().classes_with_static_reads.insert(to_boxed_str(class));
        }
    }

    pub fn static_field_written(&mut self, class: &str) {
        if !self.data.classes_with_static_writes.contains(class) {
            self.data_mut().classes_with_static_writes.insert(to_boxed_str(class));
        }
    }

    pub fn class_initialized(&mut self, class: &str) {
        if !self.data.initialized_classes.iter().any(|c| &**c == class) {
            self.data_mut().initialized_classes.push(to_boxed_str(class));
        }
    }

    /// Close all frames still open, called once the run is over.
    pub fn finish_calls(&mut self) {
        if self.data.stack.is_empty() {
            return;
        }
        let data = self.data_mut();
        log::debug!("{} calls left on stack", data.stack.len());
        while let Some(call) = data.stack.pop() {
            data.finished_calls.push(call);
        }
    }

    /// Call frames are all consistent.
    pub fn is_sane(&self) -> bool {
        self.data.stack.iter().all(MethodCall::is_sane)
            && self.data.finished_calls.iter().all(MethodCall::is_sane)
    }

    /// Copy of this trace keeping only calls on `object`, or static calls.
    pub fn trace_for_object(&self, object: u32) -> Trace {
        let mut r = self.deep_clone();
        r.data_mut()
            .finished_calls
            .retain(|c| c.calling_object == object || c.calling_object == 0);
        r
    }

    /// Copy of this trace whose finished calls only keep the evaluations of the
    /// target's method inside the du counter window `[start, end]`.
    ///
    /// Evaluations of the target's control dependent branch are dropped when
    /// they would take the target's branch, if `want_cover` is set, or the
    /// alternative branch otherwise. Calls left without evaluations are
    /// dropped. Distance tables are left untouched.
    pub fn trace_in_du_range(
        &self,
        target: &DuTarget,
        want_cover: bool,
        start: u32,
        end: u32,
    ) -> Result<Trace, TraceError> {
        if start > end {
            return Err(TraceError::InvalidRange { start, end });
        }
        let covering = target.branch_value == want_cover;
        let mut r = self.deep_clone();
        let data = r.data_mut();
        data.finished_calls.retain_mut(|call| {
            if call.method_name != target.method {
                return false;
            }
            let mut removable = Vec::new();
            for i in 0..call.evals() {
                let du = call.du_counter_trace[i];
                if du < start || du > end {
                    removable.push(i);
                } else if target.branch.is_some() && call.branch_trace[i] == target.branch {
                    let taken = if covering {
                        call.true_distance_trace[i] == 0.0
                    } else {
                        call.false_distance_trace[i] == 0.0
                    };
                    if taken {
                        removable.push(i);
                    }
                }
            }
            call.remove_evals(&removable);
            call.evals() != 0
        });
        Ok(r)
    }

    pub fn covered_true_branches(&self) -> BTreeSet<BranchId> {
        self.data
            .true_distances
            .iter()
            .filter(|(_, &d)| d == 0.0)
            .map(|(&b, _)| b)
            .collect()
    }

    pub fn covered_false_branches(&self) -> BTreeSet<BranchId> {
        self.data
            .false_distances
            .iter()
            .filter(|(_, &d)| d == 0.0)
            .map(|(&b, _)| b)
            .collect()
    }

    /// Branches evaluated at least once.
    pub fn covered_predicates(&self) -> BTreeSet<BranchId> {
        self.data.covered_predicates.keys().copied().collect()
    }

    pub fn predicate_execution_count(&self) -> &FxHashMap<BranchId, u32> {
        &self.data.covered_predicates
    }

    /// How often each branch took its true outcome.
    pub fn true_outcome_count(&self) -> &FxHashMap<BranchId, u32> {
        &self.data.covered_true
    }

    pub fn false_outcome_count(&self) -> &FxHashMap<BranchId, u32> {
        &self.data.covered_false
    }

    pub fn true_distance(&self, branch: BranchId) -> Option<f64> {
        self.data.true_distances.get(&branch).copied()
    }

    pub fn false_distance(&self, branch: BranchId) -> Option<f64> {
        self.data.false_distances.get(&branch).copied()
    }

    pub fn true_distances(&self) -> &FxHashMap<BranchId, f64> {
        &self.data.true_distances
    }

    pub fn false_distances(&self) -> &FxHashMap<BranchId, f64> {
        &self.data.false_distances
    }

    pub fn true_distances_sum(&self) -> &FxHashMap<BranchId, f64> {
        &self.data.true_distances_sum
    }

    pub fn false_distances_sum(&self) -> &FxHashMap<BranchId, f64> {
        &self.data.false_distances_sum
    }

    pub fn gradient_branches(&self) -> &FxHashSet<BranchId> {
        &self.data.gradient_branches
    }

    pub fn true_distances_context(&self) -> &FxHashMap<BranchId, FxHashMap<CallContext, f64>> {
        &self.data.true_distances_context
    }

    pub fn false_distances_context(&self) -> &FxHashMap<BranchId, FxHashMap<CallContext, f64>> {
        &self.data.false_distances_context
    }

    pub fn predicate_context_count(&self) -> &FxHashMap<BranchId, FxHashMap<CallContext, u32>> {
        &self.data.predicate_context_count
    }

    pub fn method_context_count(&self) -> &FxHashMap<Box<str>, FxHashMap<CallContext, u32>> {
        &self.data.method_context_count
    }

    /// Raw line counts, class -> method -> line -> count.
    pub fn coverage_data(&self) -> &CountTable<u32> {
        &self.data.coverage
    }

    pub fn covered_lines(&self, class: &str) -> BTreeSet<u32> {
        self.data
            .coverage
            .get(class)
            .map(|methods| methods.values().flat_map(|l| l.keys().copied()).collect())
            .unwrap_or_default()
    }

    pub fn all_covered_lines(&self) -> BTreeSet<u32> {
        self.data
            .coverage
            .values()
            .flat_map(|m| m.values())
            .flat_map(|l| l.keys().copied())
            .collect()
    }

    pub fn covered_methods(&self) -> BTreeSet<&str> {
        self.data.covered_methods.keys().map(|m| &**m).collect()
    }

    pub fn method_execution_count(&self) -> &FxHashMap<Box<str>, u32> {
        &self.data.covered_methods
    }

    pub fn covered_branchless_methods(&self) -> BTreeSet<&str> {
        self.data
            .covered_branchless_methods
            .keys()
            .map(|m| &**m)
            .collect()
    }

    /// Return value counts, class -> method -> value -> count.
    pub fn return_data(&self) -> &CountTable<i64> {
        &self.data.return_data
    }

    pub fn method_calls(&self) -> &[MethodCall] {
        &self.data.finished_calls
    }

    /// Frames still open, non empty only before `finish_calls`.
    pub fn open_calls(&self) -> &[MethodCall] {
        &self.data.stack
    }

    pub fn covered_definitions(&self) -> BTreeSet<DefUseId> {
        self.data.covered_defs.keys().copied().collect()
    }

    pub fn definition_execution_count(&self) -> &FxHashMap<DefUseId, u32> {
        &self.data.covered_defs
    }

    pub fn passed_definitions(&self, var: &str) -> Option<&FxHashMap<u32, Occurrences>> {
        self.data.passed_definitions.get(var)
    }

    pub fn passed_uses(&self, var: &str) -> Option<&FxHashMap<u32, Occurrences>> {
        self.data.passed_uses.get(var)
    }

    pub fn definition_data(&self) -> &OccurrenceTable {
        &self.data.passed_definitions
    }

    pub fn use_data(&self) -> &OccurrenceTable {
        &self.data.passed_uses
    }

    pub fn passed_def_ids(&self) -> BTreeSet<DefUseId> {
        collect_ids(&self.data.passed_definitions)
    }

    pub fn passed_use_ids(&self) -> BTreeSet<DefUseId> {
        collect_ids(&self.data.passed_uses)
    }

    /// Current value of the logical def/use clock.
    pub fn du_counter(&self) -> u32 {
        self.data.du_counter
    }

    pub fn mutation_distance(&self, mutant: MutantId) -> Option<f64> {
        self.data.mutant_distances.get(&mutant).copied()
    }

    pub fn mutation_distances(&self) -> &FxHashMap<MutantId, f64> {
        &self.data.mutant_distances
    }

    pub fn was_mutation_touched(&self, mutant: MutantId) -> bool {
        self.data.touched_mutants.contains(&mutant)
    }

    pub fn touched_mutants(&self) -> &FxHashSet<MutantId> {
        &self.data.touched_mutants
    }

    /// Mutants reached with infection distance 0.
    pub fn infected_mutants(&self) -> BTreeSet<MutantId> {
        self.data
            .mutant_distances
            .iter()
            .filter(|(_, &d)| d == 0.0)
            .map(|(&m, _)| m)
            .collect()
    }

    pub fn explicit_fault(&self) -> Option<&Arc<Fault>> {
        self.data.explicit_fault.as_ref()
    }

    pub fn classes_with_static_reads(&self) -> &FxHashSet<Box<str>> {
        &self.data.classes_with_static_reads
    }

    pub fn classes_with_static_writes(&self) -> &FxHashSet<Box<str>> {
        &self.data.classes_with_static_writes
    }

    pub fn initialized_classes(&self) -> &[Box<str>] {
        &self.data.initialized_classes
    }

    /// Readable dump of the definitions and uses of `var`, all variables if `None`.
    pub fn def_use_info(&self, var: Option<&str>) -> String {
        let mut out = String::new();
        let mut vars = self
            .data
            .passed_definitions
            .keys()
            .chain(self.data.passed_uses.keys())
            .map(|v| &**v)
            .filter(|v| var.map_or(true, |want| want == *v))
            .collect::<Vec<_>>();
        vars.sort_unstable();
        vars.dedup();
        for v in vars {
            let _ = writeln!(out, "  {}:", v);
            let mut events = Vec::new();
            for (kind, table) in [("def", &self.data.passed_definitions), ("use", &self.data.passed_uses)].iter() {
                if let Some(per_object) = table.get(v) {
                    for (object, occ) in per_object.iter() {
                        for (du, id) in occ.iter() {
                            events.push((*du, *kind, *object, *id));
                        }
                    }
                }
            }
            events.sort_unstable();
            for (du, kind, object, id) in events {
                let _ = writeln!(out, "    {} {}{} on object {}", du, kind, id, object);
            }
        }
        out
    }
}

fn collect_ids(table: &OccurrenceTable) -> BTreeSet<DefUseId> {
    table
        .values()
        .flat_map(|per_object| per_object.values())
        .flat_map(|occ| occ.values().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(t: &mut Trace, branch: BranchId, p: Predicate) {
        t.branch_passed(branch, p.distance());
    }

    #[test]
    fn equality_branch_not_taken() {
        let mut t = Trace::default();
        eval(&mut t, 1, Predicate::Zero(Cmp::Eq, 5));
        assert_eq!(t.true_distance(1), Some(5.0));
        assert_eq!(t.false_distance(1), Some(0.0));
        assert!(t.covered_false_branches().contains(&1));
        assert!(t.covered_true_branches().is_empty());
    }

    #[test]
    fn minimum_and_sum() {
        let mut t = Trace::default();
        eval(&mut t, 3, Predicate::Zero(Cmp::Eq, 5));
        eval(&mut t, 3, Predicate::Zero(Cmp::Eq, -2));
        eval(&mut t, 3, Predicate::Zero(Cmp::Eq, 9));
        assert_eq!(t.true_distance(3), Some(2.0));
        assert_eq!(t.true_distances_sum()[&3], 16.0);
        assert_eq!(t.predicate_execution_count()[&3], 3);
    }

    #[test]
    fn mutant_minimum() {
        let mut t = Trace::default();
        t.mutation_passed(4, 0.0);
        t.mutation_passed(4, 3.5);
        assert!(t.touched_mutants().contains(&4));
        assert_eq!(t.mutation_distance(4), Some(0.0));
        assert!(t.infected_mutants().contains(&4));
        t.mutation_passed(9, 3.5);
        assert!(!t.infected_mutants().contains(&9));
        assert!(t.was_mutation_touched(9));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut t = Trace::default();
        t.entered_method("A", "f", Some(0x10), false);
        eval(&mut t, 1, Predicate::Zero(Cmp::Lt, 1));
        t.line_passed("A", "f", 3);
        t.mutation_passed(1, 1.0);
        t.exit_method("A", "f").unwrap();
        for _ in 0..2 {
            t.clear();
            assert!(t.true_distances().is_empty());
            assert!(t.false_distances().is_empty());
            assert!(t.method_execution_count().is_empty());
            assert!(t.mutation_distances().is_empty());
            assert!(t.touched_mutants().is_empty());
            assert!(t.method_calls().is_empty());
            assert_eq!(t.open_calls().len(), 1);
        }
    }

    #[test]
    fn copies_are_independent() {
        let mut t = Trace::default();
        eval(&mut t, 1, Predicate::Zero(Cmp::Gt, 4));
        let lazy = t.lazy_clone();
        assert!(t.is_shared());
        let mut copy = t.lazy_clone();
        eval(&mut copy, 2, Predicate::Zero(Cmp::Eq, 0));
        copy.mutation_passed(7, 0.0);
        copy.line_passed("A", "f", 10);
        assert!(t.true_distance(2).is_none());
        assert!(t.mutation_distances().is_empty());
        assert!(t.all_covered_lines().is_empty());
        assert_eq!(lazy.true_distances().len(), 1);

        let mut deep = t.deep_clone();
        deep.clear();
        assert_eq!(t.true_distance(1), Some(0.0));
    }

    #[test]
    fn frames_balance() {
        let mut t = Trace::new(TraceConf {
            def_use_fake_entry: true,
            ..TraceConf::default()
        });
        t.entered_method("A", "f", None, false);
        eval(&mut t, 1, Predicate::Int(Cmp::Lt, 1, 2));
        t.entered_method("A", "g", None, true);
        t.line_passed("A", "g", 20);
        eval(&mut t, 2, Predicate::IsNull(true));
        t.exit_method("A", "g").unwrap();
        t.line_passed("A", "f", 11);
        t.finish_calls();
        assert!(t.is_sane());
        let calls = t.method_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(&*calls[0].method_name, "g");
        assert_eq!(calls[0].branch_trace, vec![None, Some(2)]);
        assert_eq!(calls[0].depth, 2);
        assert_eq!(calls[1].line_trace, vec![11]);
        assert!(calls[2].is_main());
        assert!(t.covered_branchless_methods().contains("A.g"));
        assert_eq!(t.method_execution_count()["A.f"], 1);
    }

    #[test]
    fn line_repairs_stack() {
        let mut t = Trace::default();
        t.entered_method("A", "f", None, false);
        t.entered_method("B", "g", None, false);
        t.entered_method("C", "h", None, false);
        // g and h never reported their exit.
        t.line_passed("A", "f", 5);
        assert_eq!(t.open_calls().len(), 2);
        assert_eq!(t.method_calls().len(), 2);
        assert_eq!(t.open_calls()[1].line_trace, vec![5]);
        assert!(t.covered_lines("A").contains(&5));
    }

    #[test]
    fn exit_underflow() {
        let mut t = Trace::default();
        t.entered_method("A", "f", None, false);
        t.exit_method("A", "f").unwrap();
        // main frame without evaluations is discarded.
        t.exit_method("A", "f").unwrap();
        let err = t.exit_method("A", "f").unwrap_err();
        assert_eq!(
            err,
            TraceError::CallStackUnderflow {
                class: "A".into(),
                method: "f".into()
            }
        );
    }

    #[test]
    fn def_use_and_objects() {
        let mut t = Trace::default();
        t.entered_method("A", "f", Some(0xa0), false);
        t.definition_passed("x", false, Some(0xa0), 1);
        t.use_passed("x", false, Some(0xa0), 2);
        t.exit_method("A", "f").unwrap();
        t.entered_method("A", "f", Some(0xb0), false);
        t.definition_passed("x", false, Some(0xb0), 1);
        t.definition_passed("s", true, Some(0xb0), 3);
        t.exit_method("A", "f").unwrap();
        t.entered_method("A", "sf", None, false);
        t.exit_method("A", "sf").unwrap();

        let defs = t.passed_definitions("x").unwrap();
        assert_eq!(defs[&1].get(&0), Some(&1));
        assert_eq!(defs[&2].get(&2), Some(&1));
        assert_eq!(t.passed_uses("x").unwrap()[&1].get(&1), Some(&2));
        assert!(t.passed_definitions("s").unwrap().contains_key(&0));
        assert_eq!(t.definition_execution_count()[&1], 2);
        assert_eq!(t.du_counter(), 4);
        assert_eq!(t.passed_def_ids().into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(t.def_use_info(Some("x")).contains("0 def1 on object 1"));

        let first = t.trace_for_object(1);
        let objects: Vec<u32> = first.method_calls().iter().map(|c| c.calling_object).collect();
        assert_eq!(objects, vec![1, 0]);
    }

    #[test]
    fn du_range_view() {
        let mut t = Trace::default();
        t.entered_method("A", "f", None, false);
        eval(&mut t, 1, Predicate::Zero(Cmp::Eq, 0));
        t.definition_passed("x", false, None, 1);
        eval(&mut t, 1, Predicate::Zero(Cmp::Eq, 3));
        t.definition_passed("x", false, None, 1);
        eval(&mut t, 2, Predicate::Zero(Cmp::Eq, 3));
        t.exit_method("A", "f").unwrap();
        t.entered_method("A", "other", None, false);
        eval(&mut t, 5, Predicate::Zero(Cmp::Eq, 0));
        t.exit_method("A", "other").unwrap();

        let target = DuTarget {
            method: "f".into(),
            branch: Some(1),
            branch_value: true,
        };
        let view = t.trace_in_du_range(&target, true, 0, 1).unwrap();
        let calls = view.method_calls();
        assert_eq!(calls.len(), 1);
        // the covering evaluation at du 0 is hidden, du 2 is out of range.
        assert_eq!(calls[0].branch_trace, vec![Some(1)]);
        assert_eq!(calls[0].du_counter_trace, vec![1]);
        assert!(calls[0].is_sane());
        assert_eq!(t.method_calls().len(), 2);
        assert!(t.trace_in_du_range(&target, true, 2, 1).is_err());
    }

    #[test]
    fn context_breakdown() {
        let mut t = Trace::new(TraceConf {
            context: true,
            ..TraceConf::default()
        });
        t.entered_method("A", "f", None, false);
        eval(&mut t, 1, Predicate::Zero(Cmp::Eq, 4));
        t.entered_method("A", "g", None, false);
        eval(&mut t, 1, Predicate::Zero(Cmp::Eq, 2));
        let outer = CallContext::from_frames(&["A.f"]);
        let inner = CallContext::from_frames(&["A.f", "A.g"]);
        assert_eq!(t.true_distances_context()[&1][&outer], 4.0);
        assert_eq!(t.true_distances_context()[&1][&inner], 2.0);
        assert_eq!(t.predicate_context_count()[&1][&inner], 1);
        assert_eq!(t.method_context_count()["A.g"][&inner], 1);
    }

    #[test]
    fn side_observations() {
        let mut t = Trace::new(TraceConf {
            gradient_branches: true,
            ..TraceConf::default()
        });
        eval(&mut t, 1, Predicate::IsNull(false));
        eval(&mut t, 2, Predicate::Int(Cmp::Le, 10, 1));
        assert!(!t.gradient_branches().contains(&1));
        assert!(t.gradient_branches().contains(&2));

        t.return_value("A", "f", 3);
        t.return_value("A", "f", 3);
        assert_eq!(t.return_data()["A"]["f"][&3], 2);
        assert_eq!(hash_rendering("Foo@1b6d3586[x=1]"), hash_rendering("Foo@7852e922[x=1]"));
        assert_ne!(hash_rendering("Foo[x=1]"), hash_rendering("Foo[x=2]"));

        t.class_initialized("A");
        t.class_initialized("A");
        t.static_field_read("B");
        t.static_field_written("C");
        assert_eq!(t.initialized_classes().len(), 1);
        assert!(t.classes_with_static_reads().contains("B"));
        assert!(t.classes_with_static_writes().contains("C"));
    }
}
