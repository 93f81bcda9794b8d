//! Per-channel attribute storage.
//!
//! spec.md §4.D lists "an attribute map" among a channel's fields without
//! further detail. Implemented as a small type-keyed map analogous to
//! Netty's `AttributeKey`/`AttributeMap`, letting handlers stash per-channel
//! state without widening the `Channel` trait itself (SPEC_FULL §5).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A typed key into an [`AttributeMap`]. Two keys with the same name but
/// different `T` are distinct; two keys built with [`AttributeKey::new`]
/// are always distinct from each other even with the same name, mirroring
/// Netty's `AttributeKey.valueOf` identity semantics.
pub struct AttributeKey<T> {
    id: u64,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> AttributeKey<T> {
        AttributeKey {
            id: self.id,
            name: self.name,
            _marker: PhantomData,
        }
    }
}
impl<T> Copy for AttributeKey<T> {}

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

impl<T: Send + Sync + 'static> AttributeKey<T> {
    pub fn new(name: &'static str) -> AttributeKey<T> {
        AttributeKey {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A small type-keyed bag of per-channel attributes, guarded by one lock.
#[derive(Default)]
pub struct AttributeMap {
    values: RwLock<HashMap<(u64, TypeId), Box<dyn Any + Send + Sync>>>,
}

impl AttributeMap {
    pub fn new() -> AttributeMap {
        AttributeMap::default()
    }

    pub fn set<T: Send + Sync + Clone + 'static>(&self, key: AttributeKey<T>, value: T) {
        self.values
            .write()
            .insert((key.id, TypeId::of::<T>()), Box::new(value));
    }

    pub fn get<T: Send + Sync + Clone + 'static>(&self, key: AttributeKey<T>) -> Option<T> {
        self.values
            .read()
            .get(&(key.id, TypeId::of::<T>()))
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn remove<T: Send + Sync + Clone + 'static>(&self, key: AttributeKey<T>) -> Option<T> {
        self.values
            .write()
            .remove(&(key.id, TypeId::of::<T>()))
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn has<T: Send + Sync + 'static>(&self, key: AttributeKey<T>) -> bool {
        self.values.read().contains_key(&(key.id, TypeId::of::<T>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let attrs = AttributeMap::new();
        let key: AttributeKey<String> = AttributeKey::new("name");
        attrs.set(key, "vortex".to_string());
        assert_eq!(attrs.get(key), Some("vortex".to_string()));
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let attrs = AttributeMap::new();
        let a: AttributeKey<i32> = AttributeKey::new("a");
        let b: AttributeKey<i32> = AttributeKey::new("a");
        attrs.set(a, 1);
        assert_eq!(attrs.get(a), Some(1));
        assert_eq!(attrs.get(b), None);
    }
}
