//! Process-wide null-key registry.
//!
//! Hash indexes store null and default values under one distinguished key per
//! key type (the null sentinel), so the bucket maps never need null-aware keys.
//! Sentinels are created on first use and never change afterwards. The shard
//! lock taken by `DashMap::entry` serializes the first access per type.

use crate::key::IndexKey;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};
use tracing::debug;

type Sentinel = Arc<dyn Any + Send + Sync>;

static REGISTRY: OnceLock<DashMap<TypeId, Sentinel>> = OnceLock::new();

fn registry() -> &'static DashMap<TypeId, Sentinel> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Get the null sentinel for key type `K`.
pub fn null_key<K: IndexKey>() -> K {
    let type_id = TypeId::of::<K>();

    if let Some(sentinel) = registry()
        .get(&type_id)
        .and_then(|entry| entry.value().downcast_ref::<K>().cloned())
    {
        return sentinel;
    }

    let entry = registry().entry(type_id).or_insert_with(|| {
        debug!(key_type = %K::VALUE_TYPE, "Registering null sentinel");
        Arc::new(K::make_null())
    });
    entry
        .value()
        .downcast_ref::<K>()
        .cloned()
        .unwrap_or_else(K::make_null)
}

/// Check whether `key` is the null sentinel of its type.
pub fn is_null_key<K: IndexKey>(key: &K) -> bool {
    *key == null_key::<K>()
}

/// Number of key types that have a registered sentinel.
pub fn registered_types() -> usize {
    registry().len()
}
