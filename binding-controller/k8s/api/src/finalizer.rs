//! Helpers for finalizer-gated deletion.
//!
//! A record carrying a finalizer is only marked for deletion when deleted; it
//! is removed from storage once its controller removes the finalizer.

use kube::{Resource, ResourceExt};

pub fn has<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Adds `finalizer`, returning true if it was not already present.
pub fn add<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if has(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Removes `finalizer`, returning true if it was present.
pub fn remove<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    let finalizers = obj.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

/// Returns true once the record has been marked for deletion.
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
