//! Set difference between cached and upstream schedule keys.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<K> {
    /// Cached keys absent upstream.
    pub missing: Vec<K>,
    /// Cached keys still present upstream.
    pub unchanged: Vec<K>,
}

/// Partition `cached` by membership in `upstream`.
///
/// An empty `upstream` marks every cached key missing, so callers must only
/// pass the result of a successful fetch.
pub fn diff<K: Eq + Hash + Clone + Ord>(cached: &HashSet<K>, upstream: &HashSet<K>) -> Diff<K> {
    let (mut missing, mut unchanged): (Vec<K>, Vec<K>) =
        cached.iter().cloned().partition(|key| !upstream.contains(key));
    missing.sort();
    unchanged.sort();
    Diff { missing, unchanged }
}
