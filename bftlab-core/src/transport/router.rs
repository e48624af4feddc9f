//! Partition map consulted before message delivery.

use std::collections::BTreeMap;

use crate::error::TransportError;
use crate::events::NodeId;

/// Partition id every node belongs to until isolated.
pub const DEFAULT_PARTITION: u64 = 0;

/// Maps nodes to partition ids. Two nodes can exchange messages only when
/// they share a partition.
#[derive(Clone, Debug)]
pub struct Router {
    partitions: BTreeMap<NodeId, u64>,
    next_partition_id: u64,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            partitions: BTreeMap::new(),
            next_partition_id: 1,
        }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition_of(&self, node_id: &str) -> u64 {
        self.partitions
            .get(node_id)
            .copied()
            .unwrap_or(DEFAULT_PARTITION)
    }

    /// Places a node in an explicit partition. Id 0 heals the node.
    pub fn assign(&mut self, node_id: &str, partition_id: u64) -> Result<(), TransportError> {
        if partition_id == DEFAULT_PARTITION {
            self.partitions.remove(node_id);
            return Ok(());
        }
        let next = partition_id
            .checked_add(1)
            .ok_or(TransportError::PartitionOverflow)?;
        self.partitions.insert(node_id.to_string(), partition_id);
        self.next_partition_id = self.next_partition_id.max(next);
        Ok(())
    }

    /// Moves a single node into a fresh partition.
    pub fn isolate_node(&mut self, node_id: &str) -> Result<u64, TransportError> {
        self.isolate_nodes(std::iter::once(node_id))
    }

    /// Moves a group of nodes into one fresh partition shared by the group.
    pub fn isolate_nodes<'a, I>(&mut self, nodes: I) -> Result<u64, TransportError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let partition_id = self.next_partition_id;
        self.next_partition_id = partition_id
            .checked_add(1)
            .ok_or(TransportError::PartitionOverflow)?;
        for node_id in nodes {
            self.partitions.insert(node_id.to_string(), partition_id);
        }
        Ok(partition_id)
    }

    pub fn heal_node(&mut self, node_id: &str) {
        self.partitions.remove(node_id);
    }

    pub fn reset(&mut self) {
        self.partitions.clear();
    }

    pub fn have_connectivity(&self, a: &str, b: &str) -> bool {
        self.partition_of(a) == self.partition_of(b)
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }

    pub fn partitions(&self) -> &BTreeMap<NodeId, u64> {
        &self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_allocates_fresh_ids() {
        let mut router = Router::new();
        assert_eq!(router.isolate_node("r3").unwrap(), 1);
        assert_eq!(router.isolate_nodes(["r0", "r1"]).unwrap(), 2);
        assert!(router.have_connectivity("r0", "r1"));
        assert!(!router.have_connectivity("r0", "r3"));
        assert!(!router.have_connectivity("r2", "r3"));
    }

    #[test]
    fn explicit_assignment_keeps_counter_ahead() {
        let mut router = Router::new();
        router.assign("a", 7).unwrap();
        assert_eq!(router.isolate_node("b").unwrap(), 8);
        router.assign("a", DEFAULT_PARTITION).unwrap();
        assert_eq!(router.partition_of("a"), DEFAULT_PARTITION);
    }

    #[test]
    fn partition_ids_do_not_wrap() {
        let mut router = Router::new();
        assert!(matches!(
            router.assign("a", u64::MAX),
            Err(TransportError::PartitionOverflow)
        ));
        assert_eq!(router.partition_of("a"), DEFAULT_PARTITION);

        router.assign("a", u64::MAX - 1).unwrap();
        assert!(matches!(
            router.isolate_node("b"),
            Err(TransportError::PartitionOverflow)
        ));
        assert_eq!(router.partition_of("b"), DEFAULT_PARTITION);
    }

    #[test]
    fn heal_and_reset_restore_connectivity() {
        let mut router = Router::new();
        router.isolate_node("d").unwrap();
        router.heal_node("d");
        assert!(router.have_connectivity("a", "d"));
        router.isolate_nodes(["a", "b"]).unwrap();
        router.reset();
        assert!(!router.is_partitioned());
    }
}
