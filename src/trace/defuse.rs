//! Data flow bookkeeping: definitions and uses of variables.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::call::BranchId;

/// Stable id of a definition or use site.
pub type DefUseId = u32;

/// du counter -> def/use id, ordered by logical time.
pub type Occurrences = BTreeMap<u32, DefUseId>;

/// variable -> receiver object id -> occurrences.
pub type OccurrenceTable = FxHashMap<Box<str>, FxHashMap<u32, Occurrences>>;

/// Static information of one definition or use site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefUseSite {
    pub var: Box<str>,
    /// Site accesses a static variable, its occurrences are filed under object 0.
    pub is_static: bool,
}

/// Resolves def/use ids passed by instrumented code.
pub trait DefUseTable: Send + Sync {
    fn definition(&self, id: DefUseId) -> Option<&DefUseSite>;
    fn use_site(&self, id: DefUseId) -> Option<&DefUseSite>;
}

/// Plain in-memory def/use table.
#[derive(Debug, Default, Clone)]
pub struct DefUsePool {
    defs: FxHashMap<DefUseId, DefUseSite>,
    uses: FxHashMap<DefUseId, DefUseSite>,
}

impl DefUsePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_definition<T: AsRef<str>>(&mut self, id: DefUseId, var: T, is_static: bool) {
        let site = DefUseSite {
            var: crate::utils::to_boxed_str(var),
            is_static,
        };
        self.defs.insert(id, site);
    }

    pub fn add_use<T: AsRef<str>>(&mut self, id: DefUseId, var: T, is_static: bool) {
        let site = DefUseSite {
            var: crate::utils::to_boxed_str(var),
            is_static,
        };
        self.uses.insert(id, site);
    }
}

impl DefUseTable for DefUsePool {
    fn definition(&self, id: DefUseId) -> Option<&DefUseSite> {
        self.defs.get(&id)
    }

    fn use_site(&self, id: DefUseId) -> Option<&DefUseSite> {
        self.uses.get(&id)
    }
}

/// Def/use goal used to cut a trace down to a du counter window.
#[derive(Debug, Clone, PartialEq)]
pub struct DuTarget {
    /// Method containing the target.
    pub method: Box<str>,
    /// Branch the target is control dependent on, `None` for the method root.
    pub branch: Option<BranchId>,
    /// Outcome of `branch` that leads to the target.
    pub branch_value: bool,
}

pub(crate) fn record(table: &mut OccurrenceTable, var: &str, object: u32, du: u32, id: DefUseId) {
    if let Some(per_object) = table.get_mut(var) {
        per_object.entry(object).or_default().insert(du, id);
    } else {
        let mut per_object = FxHashMap::default();
        per_object.entry(object).or_insert_with(Occurrences::new).insert(du, id);
        table.insert(crate::utils::to_boxed_str(var), per_object);
    }
}
