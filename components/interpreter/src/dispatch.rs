//! Method lookup and the global lookup cache.
//!
//! `lookup` walks the superclass chain for an exact selector match. The
//! global cache memoizes results per (class, selector) — including negative
//! results as a does-not-understand marker — guarded by the stability
//! assumptions of every class the walk consulted. Invalidation never touches
//! the cache; an entry whose assumptions died is recomputed on its next use.

use core_types::{Assumption, ClassId, Selector};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::rc::Rc;

use bytecode_system::CompiledMethod;
use object_model::ClassTable;

/// Outcome of a method lookup.
#[derive(Debug, Clone)]
pub enum LookupResult {
    /// Found: the method and the class defining it
    Method(Rc<CompiledMethod>, ClassId),
    /// No class in the chain understands the selector
    DoesNotUnderstand,
}

/// Assumption set guarding a cached lookup result.
pub type LookupAssumptions = SmallVec<[Assumption; 8]>;

/// Uncached superclass walk. Returns the result together with the
/// assumptions of every class consulted: the method-dictionary flag of each
/// class whose dictionary was probed and the hierarchy flag of each class
/// whose superclass link the walk followed.
pub fn lookup_uncached(
    classes: &ClassTable,
    class: ClassId,
    selector: Selector,
) -> (LookupResult, LookupAssumptions) {
    let mut assumptions = LookupAssumptions::new();
    for current in classes.hierarchy(class) {
        let entry = classes.get(current);
        assumptions.push(entry.methods_assumption());
        if let Some(method) = entry.method_at(selector) {
            return (LookupResult::Method(method, current), assumptions);
        }
        assumptions.push(entry.hierarchy_assumption());
    }
    (LookupResult::DoesNotUnderstand, assumptions)
}

struct CacheEntry {
    result: LookupResult,
    assumptions: LookupAssumptions,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        self.assumptions.iter().all(Assumption::is_valid)
    }
}

/// Global (class, selector) lookup cache.
#[derive(Default)]
pub struct MethodCache {
    entries: HashMap<(ClassId, Selector), CacheEntry>,
}

impl MethodCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached lookup; refills from the superclass walk when the entry is
    /// missing or its assumptions died.
    pub fn lookup(
        &mut self,
        classes: &ClassTable,
        class: ClassId,
        selector: Selector,
    ) -> LookupResult {
        self.lookup_with_assumptions(classes, class, selector).0
    }

    /// As [`Self::lookup`], also handing back the entry's assumption set so
    /// call-site caches can guard their copy with the same flags.
    pub fn lookup_with_assumptions(
        &mut self,
        classes: &ClassTable,
        class: ClassId,
        selector: Selector,
    ) -> (LookupResult, LookupAssumptions) {
        if let Some(entry) = self.entries.get(&(class, selector)) {
            if entry.is_valid() {
                return (entry.result.clone(), entry.assumptions.clone());
            }
        }
        let (result, assumptions) = lookup_uncached(classes, class, selector);
        self.entries.insert(
            (class, selector),
            CacheEntry {
                result: result.clone(),
                assumptions: assumptions.clone(),
            },
        );
        (result, assumptions)
    }

    /// Entries currently resident (valid or not); diagnostic only.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
