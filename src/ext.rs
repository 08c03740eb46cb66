//! Built-in extension type registrations installed into every
//! [`crate::Factory`] by default.
use std::sync::Arc;

use crate::registry::{PackerFn, PackerRegistry, UnpackerFn, UnpackerRegistry};
use crate::timestamp::Timestamp;

/// Register the standard timestamp extension (type -1) on both
/// registries, so `write_typed::<Timestamp>`/`read_typed::<Timestamp>`
/// work without any application-side setup.
///
/// This is purely a convenience for the typed API: the generic
/// `Value`-based encode/decode path handles `Value::Timestamp` as a
/// hardcoded case and never consults these registries at all.
pub(crate) fn register_standard_extensions(packer: &mut PackerRegistry, unpacker: &mut UnpackerRegistry) {
    packer.register::<Timestamp>(
        crate::marker::TIMESTAMP_EXT_TYPE,
        PackerFn::Flat(Arc::new(|v| {
            let ts = v.downcast_ref::<Timestamp>().expect("registered under Timestamp's TypeId");
            let mut payload = Vec::with_capacity(ts.wire_len());
            ts.encode_payload(&mut payload);
            payload
        })),
        0,
    );
    unpacker.register(
        crate::marker::TIMESTAMP_EXT_TYPE,
        UnpackerFn::Flat(Arc::new(|payload| {
            Timestamp::decode_payload(payload).map(|ts| Box::new(ts) as Box<dyn std::any::Any + Send>)
        })),
        0,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips_through_the_registry() {
        let mut packer = PackerRegistry::new();
        let mut unpacker = UnpackerRegistry::new();
        register_standard_extensions(&mut packer, &mut unpacker);

        let ts = Timestamp::from_seconds(12345);
        let (type_id, func, _) = packer.lookup(&ts).expect("timestamp is registered");
        assert_eq!(type_id, crate::marker::TIMESTAMP_EXT_TYPE);
        let payload = match func {
            PackerFn::Flat(f) => f(&ts),
            PackerFn::Recursive(_) => panic!("wrong variant"),
        };

        let (func, _) = unpacker.lookup(type_id).expect("timestamp unpacker is registered");
        let boxed = match func {
            UnpackerFn::Flat(f) => f(&payload).unwrap(),
            UnpackerFn::Recursive(_) => panic!("wrong variant"),
        };
        assert_eq!(*boxed.downcast::<Timestamp>().unwrap(), ts);
    }
}
