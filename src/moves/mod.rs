// src/moves/mod.rs

//! Neighbor generators for the tabu search.
//!
//! Each operator takes the frontier layout string, decodes it, overrides the
//! placed modules' active works with the assignment the oracle reported for
//! that layout, and emits a deduplicated list of candidate layout strings.
//! Every candidate is produced from a fresh decode of the frontier, so one
//! candidate's mutations never leak into the next.

mod anti_serialize;
mod parallelize;
mod swap;

pub use anti_serialize::anti_serialize_neighbours;
pub use parallelize::parallelize_neighbours;
pub use swap::swap_neighbours;

use crate::error::Result;
use crate::plant::{ActiveWorks, Plant};

/// Decode the frontier, bake the oracle-reported active works into the
/// placed modules, and re-encode. The returned string is what the operators
/// decode per candidate.
pub(crate) fn restored_frontier(
    plant: &mut Plant,
    frontier: &str,
    active: &ActiveWorks,
) -> Result<String> {
    plant.decode(frontier)?;
    plant.restore_active_works(active);
    plant.encode()
}

/// Drop duplicate candidates, keeping first occurrences in order.
pub(crate) fn dedup(candidates: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
