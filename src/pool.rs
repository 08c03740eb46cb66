//! A bounded, thread-safe pool of recycled [`Encoder`]/[`Decoder`]
//! instances.
use std::sync::{Arc, Mutex};

use log::trace;

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::factory::Factory;

/// A bounded LIFO of encoders and a bounded LIFO of decoders, both minted
/// from the same [`Factory`]. Checking an instance out resets it first
/// (so a caller never observes another caller's leftover state); minting
/// happens lazily the first time a checkout finds the pool empty.
///
/// The mutexes only serialize the checkout/return bookkeeping -- the
/// yielded instance itself is used outside the lock, so pool contention
/// never blocks on actual encode/decode work.
pub struct Pool {
    factory: Arc<Factory>,
    capacity: usize,
    encoders: Mutex<Vec<Encoder>>,
    decoders: Mutex<Vec<Decoder>>,
}

impl Pool {
    /// Build a pool backed by `factory`, holding at most `capacity` idle
    /// instances of each kind.
    pub fn new(factory: Arc<Factory>, capacity: usize) -> Pool {
        Pool {
            factory,
            capacity,
            encoders: Mutex::new(Vec::new()),
            decoders: Mutex::new(Vec::new()),
        }
    }

    /// Check out an encoder (minting one if the pool is empty), run `f`
    /// on it, then reset and return it to the pool.
    pub fn with_encoder<R>(&self, f: impl FnOnce(&mut Encoder) -> R) -> R {
        let mut encoder = match self.encoders.lock().unwrap().pop() {
            Some(e) => {
                trace!("pool: checked out an idle encoder");
                e
            }
            None => {
                trace!("pool: minting a new encoder");
                self.factory.encoder()
            }
        };
        let result = f(&mut encoder);
        let _ = encoder.finalize();
        let mut guard = self.encoders.lock().unwrap();
        if guard.len() < self.capacity {
            guard.push(encoder);
            trace!("pool: returned an encoder");
        } else {
            trace!("pool: encoder pool full, dropping returned instance");
        }
        result
    }

    /// Check out a decoder (minting one if the pool is empty), run `f` on
    /// it, then reset and return it to the pool.
    pub fn with_decoder<R>(&self, f: impl FnOnce(&mut Decoder) -> R) -> R {
        let mut decoder = match self.decoders.lock().unwrap().pop() {
            Some(d) => {
                trace!("pool: checked out an idle decoder");
                d
            }
            None => {
                trace!("pool: minting a new decoder");
                self.factory.decoder()
            }
        };
        let result = f(&mut decoder);
        decoder.reset();
        let mut guard = self.decoders.lock().unwrap();
        if guard.len() < self.capacity {
            guard.push(decoder);
            trace!("pool: returned a decoder");
        } else {
            trace!("pool: decoder pool full, dropping returned instance");
        }
        result
    }

    /// Number of idle encoders currently held by the pool.
    pub fn idle_encoders(&self) -> usize {
        self.encoders.lock().unwrap().len()
    }

    /// Number of idle decoders currently held by the pool.
    pub fn idle_decoders(&self) -> usize {
        self.decoders.lock().unwrap().len()
    }
}
