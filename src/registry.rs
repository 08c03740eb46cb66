//! Extension-type registries used by the typed `write_typed`/`read_typed`
//! encode/decode path.
//!
//! Rust types don't carry runtime class identity the way the host
//! language this format was originally designed around does, so
//! "register a type, with subtype lookup falling back through its
//! ancestors" becomes two lookup tiers here instead: an exact
//! [`std::any::TypeId`] match (the common case, checked first), and an
//! ordered list of predicate-guarded fallback registrations consulted on
//! a direct miss. Whichever fallback matches first is then cached by the
//! concrete `TypeId`, so repeated encodes/decodes of the same concrete
//! type skip straight back to it. Registering or unregistering anything
//! invalidates the cache.
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::Result;

/// Set on a registration that packs/unpacks an arbitrary-precision
/// integer extension, exempting it from the normal 64-bit integer range
/// check. Consulted at both `Encoder::write_typed`/`Decoder::read_typed`
/// dispatch sites when `T` is [`crate::integer::Integer`]: without this
/// flag, a registered integer packer/unpacker is bypassed in favor of
/// the native tag path, since in-range integers always round-trip
/// through `write_int`/the decoder's scalar tags regardless of what's
/// registered.
///
/// There's no equivalent `RECURSIVE` bit: whether a registration
/// recurses back into the `Encoder`/`Decoder` is already carried by
/// which [`PackerFn`]/[`UnpackerFn`] variant (`Flat` vs. `Recursive`) it
/// was registered with, so a redundant flag bit would never be
/// consulted.
pub const OVERSIZED_INTEGER: u8 = 0b10;

type FlatPackFn = dyn Fn(&dyn Any) -> Vec<u8> + Send + Sync;
type RecursivePackFn = dyn Fn(&dyn Any, &mut Encoder) -> Result<()> + Send + Sync;
type FlatUnpackFn = dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>> + Send + Sync;
type RecursiveUnpackFn = dyn Fn(&mut Decoder) -> Result<Box<dyn Any + Send>> + Send + Sync;

/// A registered packer callback: either a flat value-to-bytes function,
/// or one that recurses into the encoder for nested structure.
#[derive(Clone)]
pub enum PackerFn {
    /// Convert the value directly to a payload.
    Flat(Arc<FlatPackFn>),
    /// Write the value through the encoder, which may itself call back
    /// into the registry for nested values.
    Recursive(Arc<RecursivePackFn>),
}

/// A registered unpacker callback: either a flat bytes-to-value
/// function, or one that recurses into the decoder for nested structure.
#[derive(Clone)]
pub enum UnpackerFn {
    /// Parse the payload directly into a value.
    Flat(Arc<FlatUnpackFn>),
    /// Read the value through the decoder, which may itself call back
    /// into the registry for nested values.
    Recursive(Arc<RecursiveUnpackFn>),
}

type Predicate = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;

#[derive(Clone)]
struct PackerEntry {
    type_id: i8,
    func: PackerFn,
    flags: u8,
}

struct CapabilityEntry {
    predicate: Predicate,
    entry: PackerEntry,
}

/// Maps concrete Rust types to the extension type id and callback used to
/// encode them.
#[derive(Default)]
pub struct PackerRegistry {
    direct: HashMap<TypeId, PackerEntry>,
    capabilities: Vec<CapabilityEntry>,
    cache: RwLock<HashMap<TypeId, usize>>,
}

impl PackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalidate_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Register a packer keyed on the exact concrete type `T`.
    pub fn register<T: Any>(&mut self, type_id: i8, func: PackerFn, flags: u8) {
        self.direct
            .insert(TypeId::of::<T>(), PackerEntry { type_id, func, flags });
        self.invalidate_cache();
    }

    /// Register a packer for any value whose concrete type satisfies
    /// `predicate`, consulted in registration order after the direct map
    /// misses.
    pub fn register_capability(
        &mut self,
        predicate: Predicate,
        type_id: i8,
        func: PackerFn,
        flags: u8,
    ) {
        self.capabilities.push(CapabilityEntry {
            predicate,
            entry: PackerEntry { type_id, func, flags },
        });
        self.invalidate_cache();
    }

    /// Structurally copy the registrations into a fresh registry with an
    /// empty lookup cache. `PackerRegistry` itself isn't `Clone` because
    /// its cache is behind an `RwLock`; minting an independent encoder
    /// goes through this instead so each gets its own cache.
    pub(crate) fn duplicate(&self) -> PackerRegistry {
        PackerRegistry {
            direct: self.direct.clone(),
            capabilities: self
                .capabilities
                .iter()
                .map(|c| CapabilityEntry {
                    predicate: c.predicate.clone(),
                    entry: c.entry.clone(),
                })
                .collect(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Find the registration for `value`'s concrete type, if any.
    pub fn lookup(&self, value: &dyn Any) -> Option<(i8, PackerFn, u8)> {
        let tid = value.type_id();
        if let Some(entry) = self.direct.get(&tid) {
            return Some((entry.type_id, entry.func.clone(), entry.flags));
        }
        if let Some(&idx) = self.cache.read().unwrap().get(&tid) {
            let entry = &self.capabilities[idx].entry;
            return Some((entry.type_id, entry.func.clone(), entry.flags));
        }
        for (idx, candidate) in self.capabilities.iter().enumerate() {
            if (candidate.predicate)(value) {
                self.cache.write().unwrap().insert(tid, idx);
                let entry = &candidate.entry;
                return Some((entry.type_id, entry.func.clone(), entry.flags));
            }
        }
        None
    }
}

#[derive(Clone)]
struct UnpackerEntry {
    func: UnpackerFn,
    flags: u8,
}

/// Number of distinct `i8` extension type ids (`-128..=127`).
const SLOT_COUNT: usize = 256;

fn slot_index(type_id: i8) -> usize {
    (type_id as i16 + 128) as usize
}

/// Maps extension type ids (`-128..=127`) to the callback used to decode
/// them into a boxed concrete Rust value, in a fixed 256-slot table
/// indexed by `type_id as i16 + 128` for O(1) decode-time lookup.
pub struct UnpackerRegistry {
    slots: [Option<UnpackerEntry>; SLOT_COUNT],
}

impl UnpackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unpacker for `type_id`, replacing any prior
    /// registration for that id.
    pub fn register(&mut self, type_id: i8, func: UnpackerFn, flags: u8) {
        self.slots[slot_index(type_id)] = Some(UnpackerEntry { func, flags });
    }

    /// Find the registration for `type_id`, if any.
    pub fn lookup(&self, type_id: i8) -> Option<(UnpackerFn, u8)> {
        self.slots[slot_index(type_id)]
            .as_ref()
            .map(|e| (e.func.clone(), e.flags))
    }

    /// Structurally copy the registrations into a fresh registry.
    pub(crate) fn duplicate(&self) -> UnpackerRegistry {
        UnpackerRegistry {
            slots: self.slots.clone(),
        }
    }
}

impl Default for UnpackerRegistry {
    fn default() -> Self {
        UnpackerRegistry {
            slots: std::array::from_fn(|_| None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(u32);

    #[test]
    fn direct_registration_is_found_by_concrete_type() {
        let mut reg = PackerRegistry::new();
        reg.register::<Widget>(5, PackerFn::Flat(Arc::new(|v| {
            vec![v.downcast_ref::<Widget>().unwrap().0 as u8]
        })), 0);
        let w = Widget(9);
        let (type_id, func, _) = reg.lookup(&w).expect("registered");
        assert_eq!(type_id, 5);
        match func {
            PackerFn::Flat(f) => assert_eq!(f(&w), vec![9]),
            PackerFn::Recursive(_) => panic!("wrong variant"),
        }
    }

    #[test]
    fn capability_fallback_is_cached_after_first_match() {
        let mut reg = PackerRegistry::new();
        reg.register_capability(
            Arc::new(|v| v.downcast_ref::<Widget>().is_some()),
            7,
            PackerFn::Flat(Arc::new(|_| vec![])),
            0,
        );
        let w = Widget(1);
        assert!(reg.lookup(&w).is_some());
        assert_eq!(reg.cache.read().unwrap().len(), 1);
        assert!(reg.lookup(&w).is_some());
        assert_eq!(reg.cache.read().unwrap().len(), 1);
    }

    #[test]
    fn registering_invalidates_the_cache() {
        let mut reg = PackerRegistry::new();
        reg.register_capability(
            Arc::new(|v| v.downcast_ref::<Widget>().is_some()),
            7,
            PackerFn::Flat(Arc::new(|_| vec![])),
            0,
        );
        reg.lookup(&Widget(1));
        assert_eq!(reg.cache.read().unwrap().len(), 1);
        reg.register::<u8>(1, PackerFn::Flat(Arc::new(|_| vec![])), 0);
        assert_eq!(reg.cache.read().unwrap().len(), 0);
    }
}
