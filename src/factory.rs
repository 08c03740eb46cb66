//! Builds a sealed set of extension-type registrations and default
//! options, from which [`Encoder`]s and [`Decoder`]s are minted.
use std::any::Any;
use std::sync::Arc;

use crate::decoder::{DecodeOptions, Decoder};
use crate::encoder::{EncodeOptions, Encoder};
use crate::error::{Error, Result};
use crate::ext::register_standard_extensions;
use crate::pool::Pool;
use crate::registry::{PackerFn, PackerRegistry, UnpackerFn, UnpackerRegistry, OVERSIZED_INTEGER};

/// Accumulates extension type registrations and default codec options,
/// then [`Factory::freeze`]s so further registration fails. Each call to
/// [`Factory::encoder`]/[`Factory::decoder`] mints an independently
/// configured codec backed by a fresh copy of the registry (so each
/// instance gets its own capability-lookup cache).
///
/// This mirrors how a schema in this crate's lineage is built up field by
/// field and then compiled once into an immutable validator: registration
/// is only meaningful before the factory is put to use.
pub struct Factory {
    packer: PackerRegistry,
    unpacker: UnpackerRegistry,
    encode_options: EncodeOptions,
    decode_options: DecodeOptions,
    frozen: bool,
}

impl Factory {
    /// A new, unfrozen factory with the standard timestamp extension
    /// already registered.
    pub fn new() -> Factory {
        let mut packer = PackerRegistry::new();
        let mut unpacker = UnpackerRegistry::new();
        register_standard_extensions(&mut packer, &mut unpacker);
        Factory {
            packer,
            unpacker,
            encode_options: EncodeOptions::default(),
            decode_options: DecodeOptions::default(),
            frozen: false,
        }
    }

    /// Register a type's packer/unpacker pair under `type_id`. Fails with
    /// [`Error::Frozen`] if called after [`Factory::freeze`].
    ///
    /// Whether the registration is "recursive" (its callback writes/reads
    /// through an `&mut Encoder`/`&mut Decoder` rather than a flat byte
    /// payload) is carried by which [`PackerFn`]/[`UnpackerFn`] variant is
    /// passed in, so unlike the flag-based registration surface this
    /// mirrors, there's no separate `recursive` parameter here. Pass
    /// `oversized_integer: true` only when `T` is the arbitrary-precision
    /// integer extension type described in SPEC_FULL.md §4.5 -- it exempts
    /// the registration from the normal native-tag-wins rule for integers
    /// that fit in `i64`/`u64`.
    pub fn register_type<T: Any>(
        &mut self,
        type_id: i8,
        pack: PackerFn,
        unpack: UnpackerFn,
        oversized_integer: bool,
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen("Factory"));
        }
        let flags = if oversized_integer { OVERSIZED_INTEGER } else { 0 };
        self.packer.register::<T>(type_id, pack, flags);
        self.unpacker.register(type_id, unpack, flags);
        Ok(())
    }

    /// Register a fallback packer for any value whose concrete type
    /// satisfies `predicate`, tried in registration order after a direct
    /// [`Factory::register_type`] match misses. Fails once frozen.
    pub fn register_capability(
        &mut self,
        predicate: Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>,
        type_id: i8,
        pack: PackerFn,
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen("Factory"));
        }
        self.packer.register_capability(predicate, type_id, pack, 0);
        Ok(())
    }

    /// Set the default encode options minted encoders will start with.
    pub fn set_encode_options(&mut self, options: EncodeOptions) {
        self.encode_options = options;
    }

    /// Set the default decode options minted decoders will start with.
    pub fn set_decode_options(&mut self, options: DecodeOptions) {
        self.decode_options = options;
    }

    /// Seal the factory. After this, [`Factory::register_type`] and
    /// [`Factory::register_capability`] return [`Error::Frozen`].
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// `true` once [`Factory::freeze`] has been called.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mint a new [`Encoder`] configured with this factory's registry and
    /// default options.
    pub fn encoder(&self) -> Encoder {
        Encoder::from_parts(Arc::new(self.packer.duplicate()), self.encode_options.clone())
    }

    /// Mint a new [`Decoder`] configured with this factory's registry and
    /// default options.
    pub fn decoder(&self) -> Decoder {
        Decoder::from_parts(Arc::new(self.unpacker.duplicate()), self.decode_options.clone())
    }

    /// Build a [`Pool`] of recycled encoders/decoders minted from this
    /// factory, holding at most `capacity` idle instances of each kind.
    /// Requires the factory already be shared via `Arc`, since the pool
    /// keeps its own reference for lazy minting on checkout.
    pub fn pool(self: Arc<Self>, capacity: usize) -> Pool {
        Pool::new(self, capacity)
    }
}

impl Default for Factory {
    fn default() -> Self {
        Factory::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_after_freeze_fails() {
        let mut factory = Factory::new();
        factory.freeze();
        let err = factory.register_type::<u8>(
            5,
            PackerFn::Flat(Arc::new(|_| Vec::new())),
            UnpackerFn::Flat(Arc::new(|_| Ok(Box::new(0u8) as Box<dyn Any + Send>))),
            false,
        );
        assert!(matches!(err, Err(Error::Frozen(_))));
    }

    #[test]
    fn minted_decoder_knows_the_standard_timestamp_extension() {
        let factory = Factory::new();
        let mut decoder = factory.decoder();
        decoder.feed(&[0xd6, 0xff, 0, 0, 0, 0]);
        assert!(decoder.read().unwrap().unwrap().is_timestamp());
    }

    #[test]
    fn pool_convenience_constructor_mints_from_an_arc_factory() {
        let factory = Arc::new(Factory::new());
        let pool = factory.pool(2);
        assert_eq!(pool.idle_encoders(), 0);
        pool.with_encoder(|e| e.write_nil());
        assert_eq!(pool.idle_encoders(), 1);
    }

    #[test]
    fn non_oversized_integer_registration_is_ignored_for_in_range_values() {
        use crate::integer::Integer;

        let mut factory = Factory::new();
        factory
            .register_type::<Integer>(
                9,
                PackerFn::Flat(Arc::new(|_| vec![0xff, 0xff, 0xff])),
                UnpackerFn::Flat(Arc::new(|_| Ok(Box::new(Integer::from(0u8)) as Box<dyn Any + Send>))),
                false,
            )
            .unwrap();
        factory.freeze();

        let mut encoder = factory.encoder();
        encoder.write_typed(&Integer::from(42u8)).unwrap();
        let bytes = encoder.finalize().unwrap();

        // the registered packer's payload never appears; this is the plain
        // posfixint tag an un-registered `write_int(42)` would produce.
        assert_eq!(bytes, vec![42]);
    }
}
