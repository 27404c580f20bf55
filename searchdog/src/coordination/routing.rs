//! Shard-to-node routing (spec.md §4.2.3): document-id hashing to pick a
//! primary shard, and shard-id to node-id resolution against the cached
//! cluster state. The hash itself duplicates
//! [`crate::data::engine::memory::hll_insert`]'s private `fnv1a` rather
//! than exposing it from the data tier, since the two uses (cardinality
//! sketch bucketing vs. shard routing) are otherwise unrelated and a
//! coordination-tier dependency on a data-tier private helper would be the
//! wrong coupling direction.

use crate::control::state::ClusterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingError {
    UnknownIndex,
    NoShards,
    NoPrimary(u32),
}

impl std::fmt::Display for RoutingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingError::UnknownIndex => write!(f, "unknown index"),
            RoutingError::NoShards => write!(f, "index has zero shards"),
            RoutingError::NoPrimary(shard) => write!(f, "no started primary for shard {shard}"),
        }
    }
}

impl std::error::Error for RoutingError {}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// `primary_shard = fnv1a(doc_id) mod num_shards` (spec.md §4.2.3).
pub fn primary_shard(doc_id: &str, num_shards: u32) -> u32 {
    (fnv1a(doc_id.as_bytes()) % num_shards as u64) as u32
}

/// Node id hosting the started primary copy of `shard_id` in `index`.
pub fn resolve_write_node<'a>(state: &'a ClusterState, index: &str, shard_id: u32) -> Result<&'a str, RoutingError> {
    state.index(index).ok_or(RoutingError::UnknownIndex)?;
    let primary = state.primary_for(index, shard_id).ok_or(RoutingError::NoPrimary(shard_id))?;
    primary
        .assigned_node_id
        .as_deref()
        .ok_or(RoutingError::NoPrimary(shard_id))
}

/// All started copies (primary or replica) of `shard_id`, for read
/// fan-out or round-robin read-preference selection (spec.md §4.2.3
/// "reads may be served by any started copy").
pub fn resolve_read_nodes(state: &ClusterState, index: &str, shard_id: u32) -> Vec<String> {
    state
        .started_copies(index, shard_id)
        .into_iter()
        .filter_map(|s| s.assigned_node_id.clone())
        .collect()
}

/// All distinct shard ids for `index`, used to fan a cross-shard
/// search/count out to one read node per shard.
pub fn all_shard_ids(state: &ClusterState, index: &str) -> Result<Vec<u32>, RoutingError> {
    let info = state.index(index).ok_or(RoutingError::UnknownIndex)?;
    if info.num_shards == 0 {
        return Err(RoutingError::NoShards);
    }
    Ok((0..info.num_shards).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_primary_shard_is_deterministic() {
        assert_eq!(primary_shard("doc-1", 4), primary_shard("doc-1", 4));
    }

    #[test]
    fn test_primary_shard_within_range() {
        for doc_id in ["a", "b", "c", "doc-42", ""] {
            assert!(primary_shard(doc_id, 8) < 8);
        }
    }
}
