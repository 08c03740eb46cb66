//! A process-wide string interner backing `symbolize_keys`.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

static TABLE: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();

fn table() -> &'static Mutex<HashSet<Arc<str>>> {
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Return the canonical `Arc<str>` for `s`, allocating and storing one if
/// this is the first time this exact string has been interned.
///
/// Used by the decoder when `DecodeOptions::symbolize_keys` is set, so
/// that repeated map keys across many decoded values share one
/// allocation rather than each getting a fresh copy.
pub(crate) fn intern(s: &str) -> Arc<str> {
    let mut table = match table().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(existing) = table.get(s) {
        return existing.clone();
    }
    let arc: Arc<str> = Arc::from(s);
    table.insert(arc.clone());
    arc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_strings_share_one_allocation() {
        let a = intern("duplicate-key");
        let b = intern("duplicate-key");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
