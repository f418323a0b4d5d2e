// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use crate::EntityId;

/// Partition owning `key` out of `partitions`.
///
/// BLAKE3 of the raw key bytes, first eight bytes read little-endian, modulo the
/// partition count. Stable across processes and platforms, which keeps both
/// feeds co-partitioned. A zero partition count is treated as one.
pub fn partition_for(key: &EntityId, partitions: u32) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    let slot = u64::from_le_bytes(head) % u64::from(partitions.max(1));
    // slot < partitions, which fits in u32
    u32::try_from(slot).unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for i in 0..200 {
            let key = EntityId::new(format!("order-{i}")).unwrap();
            let p = partition_for(&key, 7);
            assert!(p < 7);
            assert_eq!(p, partition_for(&key, 7));
        }
    }

    #[test]
    fn single_partition_takes_everything() {
        let key = EntityId::new("x").unwrap();
        assert_eq!(partition_for(&key, 1), 0);
        assert_eq!(partition_for(&key, 0), 0);
    }

    #[test]
    fn keys_spread_over_partitions() {
        let mut seen = [false; 4];
        for i in 0..64 {
            let key = EntityId::new(format!("k{i}")).unwrap();
            seen[partition_for(&key, 4) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
