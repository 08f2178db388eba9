//! Call-site-local inline caches.
//!
//! A send site remembers its last (receiver class → lookup result) pairings
//! so the global cache can be skipped entirely while the guarding
//! assumptions hold. Sites transition monomorphic → polymorphic (up to 4
//! shapes) → megamorphic; a megamorphic site always defers to the global
//! cache. Instance-variable sites memoize the resolved slot location keyed
//! on the receiver's layout identity, dying with the layout's validity
//! assumption.

use arrayvec::ArrayVec;
use core_types::{Assumption, ClassId};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::rc::Rc;

use bytecode_system::CompiledMethod;
use object_model::{Location, SlotLayout};

use crate::dispatch::LookupResult;

/// A cached call target together with the assumptions that keep it alive:
/// the lookup-chain stability flags plus the target method's call-target
/// flag.
#[derive(Debug, Clone)]
pub struct CachedTarget {
    /// The memoized lookup result
    pub result: LookupResult,
    assumptions: SmallVec<[Assumption; 8]>,
}

impl CachedTarget {
    /// Bundle a lookup result with its guarding assumptions. The target
    /// method's own call-target flag is added automatically.
    pub fn new(result: LookupResult, mut assumptions: SmallVec<[Assumption; 8]>) -> Self {
        if let LookupResult::Method(method, _) = &result {
            assumptions.push(method.call_target_stable().clone());
        }
        Self { result, assumptions }
    }

    /// Whether every guarding assumption still holds.
    pub fn is_valid(&self) -> bool {
        self.assumptions.iter().all(Assumption::is_valid)
    }
}

/// Cache state of one send site.
#[derive(Debug, Clone, Default)]
pub enum SendSiteState {
    /// No receiver class seen yet
    #[default]
    Uninitialized,
    /// Single receiver class (the common case)
    Monomorphic {
        /// The cached receiver class
        class: ClassId,
        /// The cached target
        target: CachedTarget,
    },
    /// A handful of receiver classes
    Polymorphic {
        /// (class, target) pairings, oldest first
        entries: ArrayVec<(ClassId, CachedTarget), 4>,
    },
    /// Too many shapes; always defer to the global cache
    Megamorphic,
}

impl SendSiteState {
    /// Look up the cached target for `class`, ignoring entries whose
    /// assumptions died.
    pub fn lookup(&self, class: ClassId) -> Option<&CachedTarget> {
        match self {
            SendSiteState::Uninitialized | SendSiteState::Megamorphic => None,
            SendSiteState::Monomorphic { class: cached, target } => {
                (*cached == class && target.is_valid()).then_some(target)
            }
            SendSiteState::Polymorphic { entries } => entries
                .iter()
                .find(|(c, t)| *c == class && t.is_valid())
                .map(|(_, t)| t),
        }
    }

    /// Record a pairing, transitioning state as needed.
    pub fn update(&mut self, class: ClassId, target: CachedTarget) {
        match self {
            SendSiteState::Uninitialized => {
                *self = SendSiteState::Monomorphic { class, target };
            }
            SendSiteState::Monomorphic { class: cached, target: cached_target } => {
                if *cached == class || !cached_target.is_valid() {
                    *self = SendSiteState::Monomorphic { class, target };
                } else {
                    let mut entries = ArrayVec::new();
                    entries.push((*cached, cached_target.clone()));
                    entries.push((class, target));
                    *self = SendSiteState::Polymorphic { entries };
                }
            }
            SendSiteState::Polymorphic { entries } => {
                entries.retain(|(_, t)| t.is_valid());
                if let Some(entry) = entries.iter_mut().find(|(c, _)| *c == class) {
                    entry.1 = target;
                } else if entries.len() < entries.capacity() {
                    entries.push((class, target));
                } else {
                    *self = SendSiteState::Megamorphic;
                }
            }
            SendSiteState::Megamorphic => {}
        }
    }
}

/// Key of a call site: the owning method's identity and the send's
/// instruction index.
fn site_key(method: &Rc<CompiledMethod>, pc: usize) -> (usize, usize) {
    (Rc::as_ptr(method) as usize, pc)
}

struct SendSite {
    // Pins the method so the address key stays unambiguous.
    _method: Rc<CompiledMethod>,
    state: SendSiteState,
}

/// Registry of send-site caches, keyed by call site.
#[derive(Default)]
pub struct SendSites {
    sites: HashMap<(usize, usize), SendSite>,
}

impl SendSites {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The valid cached target of this site for `class`, if any.
    pub fn lookup(
        &self,
        method: &Rc<CompiledMethod>,
        pc: usize,
        class: ClassId,
    ) -> Option<LookupResult> {
        self.sites
            .get(&site_key(method, pc))?
            .state
            .lookup(class)
            .map(|t| t.result.clone())
    }

    /// Record a pairing for this site.
    pub fn update(
        &mut self,
        method: &Rc<CompiledMethod>,
        pc: usize,
        class: ClassId,
        target: CachedTarget,
    ) {
        self.sites
            .entry(site_key(method, pc))
            .or_insert_with(|| SendSite {
                _method: method.clone(),
                state: SendSiteState::default(),
            })
            .state
            .update(class, target);
    }
}

struct SlotSite {
    _method: Rc<CompiledMethod>,
    layout: Rc<SlotLayout>,
    location: Location,
}

/// Registry of instance-variable access sites, memoizing the resolved
/// location per layout identity.
#[derive(Default)]
pub struct SlotSites {
    sites: HashMap<(usize, usize), SlotSite>,
}

impl SlotSites {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached location, when the site has seen `layout` and the layout
    /// is still current.
    pub fn lookup(
        &self,
        method: &Rc<CompiledMethod>,
        pc: usize,
        layout: &Rc<SlotLayout>,
    ) -> Option<Location> {
        let site = self.sites.get(&site_key(method, pc))?;
        (Rc::ptr_eq(&site.layout, layout) && site.layout.is_valid()).then_some(site.location)
    }

    /// Memoize the location resolved for `layout` at this site.
    pub fn update(
        &mut self,
        method: &Rc<CompiledMethod>,
        pc: usize,
        layout: Rc<SlotLayout>,
        location: Location,
    ) {
        self.sites.insert(
            site_key(method, pc),
            SlotSite {
                _method: method.clone(),
                layout,
                location,
            },
        );
    }
}
