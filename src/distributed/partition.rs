//! Static round-robin partitioning of the chunk index space.

use std::iter::StepBy;
use std::ops::Range;

/// The chunk ordinals owned by one rank in a bulk operation.
///
/// For `total_chunks` chunks and a group of `size` ranks, rank `rank` owns the flat chunk ordinals `{rank, rank + size, rank + 2 * size, ...}` below `total_chunks`.
/// Ownership is a pure function of `(rank, size, total_chunks)`:
///  - every chunk has exactly one owner,
///  - no coordination is needed to compute it, and
///  - the number of chunks per rank differs by at most one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundRobinPartition {
    rank: usize,
    size: usize,
    total_chunks: u64,
}

impl RoundRobinPartition {
    /// Create the partition of `total_chunks` chunks for `rank` of a group of `size` ranks.
    ///
    /// # Panics
    /// Panics if `size` is zero or `rank` is not less than `size`.
    #[must_use]
    pub fn new(rank: usize, size: usize, total_chunks: u64) -> Self {
        assert!(rank < size, "rank {rank} is out of range for a group of size {size}");
        Self {
            rank,
            size,
            total_chunks,
        }
    }

    /// The rank owning this partition.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The group size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The total number of chunks being partitioned.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// The rank owning the chunk at flat `ordinal`.
    #[must_use]
    pub fn owner_of(&self, ordinal: u64) -> usize {
        // The remainder is less than size, so it fits in usize
        usize::try_from(ordinal % self.size as u64).unwrap_or_default()
    }

    /// Returns true if this rank owns the chunk at flat `ordinal`.
    #[must_use]
    pub fn contains(&self, ordinal: u64) -> bool {
        ordinal < self.total_chunks && self.owner_of(ordinal) == self.rank
    }

    /// The number of chunks owned by this rank.
    #[must_use]
    pub fn len(&self) -> u64 {
        let rank = self.rank as u64;
        if rank >= self.total_chunks {
            0
        } else {
            (self.total_chunks - rank).div_ceil(self.size as u64)
        }
    }

    /// Returns true if this rank owns no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the flat chunk ordinals owned by this rank, in increasing order.
    #[must_use]
    pub fn iter(&self) -> StepBy<Range<u64>> {
        (self.rank as u64..self.total_chunks).step_by(self.size)
    }
}

impl IntoIterator for &RoundRobinPartition {
    type Item = u64;
    type IntoIter = StepBy<Range<u64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_partition_ten_chunks_three_ranks() {
        let owned: Vec<Vec<u64>> = (0..3)
            .map(|rank| RoundRobinPartition::new(rank, 3, 10).iter().collect())
            .collect();
        assert_eq!(owned[0], vec![0, 3, 6, 9]);
        assert_eq!(owned[1], vec![1, 4, 7]);
        assert_eq!(owned[2], vec![2, 5, 8]);
        assert_eq!(RoundRobinPartition::new(0, 3, 10).len(), 4);
        assert_eq!(RoundRobinPartition::new(2, 3, 10).len(), 3);
    }

    #[test]
    fn round_robin_partition_complete_and_disjoint() {
        for size in 1..8 {
            for total_chunks in 0..40u64 {
                let mut owners = vec![0usize; usize::try_from(total_chunks).unwrap()];
                let mut lens = Vec::new();
                for rank in 0..size {
                    let partition = RoundRobinPartition::new(rank, size, total_chunks);
                    assert_eq!(partition.iter().count() as u64, partition.len());
                    lens.push(partition.len());
                    for ordinal in &partition {
                        owners[usize::try_from(ordinal).unwrap()] += 1;
                        assert!(partition.contains(ordinal));
                        assert_eq!(partition.owner_of(ordinal), rank);
                    }
                }
                assert!(owners.iter().all(|&count| count == 1));
                let max = lens.iter().max().copied().unwrap_or_default();
                let min = lens.iter().min().copied().unwrap_or_default();
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn round_robin_partition_more_ranks_than_chunks() {
        let partition = RoundRobinPartition::new(4, 6, 3);
        assert!(partition.is_empty());
        assert_eq!(partition.iter().count(), 0);
        assert!(!partition.contains(4));
    }
}
