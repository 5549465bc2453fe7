//! Feature identifiers.
//!
//! Every feature name that appears on a proof-graph edge is interned to a
//! dense, 1-based [`FeatureId`]. Line `n` of a `.features` index file holds the
//! name of feature `n`. The [`AtomicFeatureAllocator`] hands out ids from many
//! grounding threads at once.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{LearnError, ProResult};

/// Reserved feature on the restart edge every node carries back to the start state.
pub const RESTART: &str = "id(restart)";
/// Reserved feature on the self-loop of a completed state.
pub const TRUE_LOOP: &str = "id(trueLoop)";
/// Reserved feature on the self-loop of a start state that is already completed.
pub const TRUE_LOOP_RESTART: &str = "id(trueLoopRestart)";

/// Unique, niche-optimized identifier for an interned feature.
///
/// Uses `NonZeroU32` so that `Option<FeatureId>` is the same size as `FeatureId`
/// and so that the 1-based numbering of the on-disk index is enforced by the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FeatureId(NonZeroU32);

impl FeatureId {
    /// Create a `FeatureId` from a raw 1-based id.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(FeatureId)
    }

    /// Get the underlying 1-based value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The id as an array index (1-based arrays keep slot 0 unused).
    pub fn index(self) -> usize {
        self.0.get() as usize
    }
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe feature id allocator.
///
/// Produces monotonically increasing ids starting from 1.
#[derive(Debug)]
pub struct AtomicFeatureAllocator {
    next: AtomicU32,
}

impl AtomicFeatureAllocator {
    /// Create a new allocator that starts from id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Create an allocator that resumes from a given id.
    ///
    /// Useful when extending a feature index loaded from disk.
    pub fn starting_from(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start.max(1)),
        }
    }

    /// Allocate the next feature id.
    pub fn next_id(&self) -> ProResult<FeatureId> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        FeatureId::new(raw).ok_or_else(|| LearnError::FeatureSpaceExhausted.into())
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AtomicFeatureAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<FeatureId>>(),
            std::mem::size_of::<FeatureId>()
        );
    }

    #[test]
    fn feature_id_zero_is_none() {
        assert!(FeatureId::new(0).is_none());
        assert_eq!(FeatureId::new(42).unwrap().get(), 42);
        assert_eq!(FeatureId::new(7).unwrap().index(), 7);
    }

    #[test]
    fn allocator_produces_sequential_ids() {
        let alloc = AtomicFeatureAllocator::new();
        assert_eq!(alloc.next_id().unwrap().get(), 1);
        assert_eq!(alloc.next_id().unwrap().get(), 2);
        assert_eq!(alloc.peek_next(), 3);
    }

    #[test]
    fn allocator_starting_from() {
        let alloc = AtomicFeatureAllocator::starting_from(100);
        assert_eq!(alloc.next_id().unwrap().get(), 100);
        assert_eq!(alloc.next_id().unwrap().get(), 101);
    }
}
