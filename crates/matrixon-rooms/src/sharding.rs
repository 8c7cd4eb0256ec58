// =============================================================================
// Matrixon Matrix NextServer - Sharding Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Decides which instance of a multi-instance deployment owns a room's
//   bookkeeping. The room hash must agree across processes and releases,
//   so it is derived from SHA-256 rather than the std hasher.
//
// =============================================================================

use matrixon_core::config::MultiInstanceConfig;
use ruma::RoomId;
use sha2::{Digest, Sha256};

/// Ownership predicate for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardingFilter {
    instance: u32,
    total: u32,
    multi_write: bool,
}

impl ShardingFilter {
    pub fn new(instance: u32, total: u32, multi_write: bool) -> Self {
        Self {
            instance,
            total,
            multi_write,
        }
    }

    pub fn from_config(config: &MultiInstanceConfig) -> Self {
        Self::new(config.instance, config.total, config.multi_write)
    }

    /// A filter that owns every room.
    pub fn single() -> Self {
        Self::new(0, 1, false)
    }

    /// Whether this instance is responsible for `room_id`.
    pub fn is_owned(&self, room_id: &RoomId) -> bool {
        if self.multi_write || self.total <= 1 {
            return true;
        }
        room_shard(room_id.as_str(), self.total) == self.instance
    }
}

impl Default for ShardingFilter {
    fn default() -> Self {
        Self::single()
    }
}

/// Stable shard of `key` among `total` instances.
pub fn room_shard(key: &str, total: u32) -> u32 {
    if total <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(total)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::{room_id, OwnedRoomId};

    fn rooms(n: usize) -> Vec<OwnedRoomId> {
        (0..n)
            .map(|i| OwnedRoomId::try_from(format!("!room{i}:example.org")).unwrap())
            .collect()
    }

    #[test]
    fn single_instance_owns_everything() {
        let filter = ShardingFilter::single();
        assert!(rooms(32).iter().all(|room| filter.is_owned(room)));
    }

    #[test]
    fn multi_write_owns_everything() {
        let filter = ShardingFilter::new(2, 4, true);
        assert!(rooms(32).iter().all(|room| filter.is_owned(room)));
    }

    #[test]
    fn each_room_has_exactly_one_owner() {
        let filters: Vec<_> = (0..4).map(|i| ShardingFilter::new(i, 4, false)).collect();
        for room in rooms(200) {
            let owners = filters.iter().filter(|f| f.is_owned(&room)).count();
            assert_eq!(owners, 1, "{room} should have one owner");
        }
    }

    #[test]
    fn shard_is_stable() {
        let room = room_id!("!stable:example.org");
        let first = room_shard(room.as_str(), 7);
        for _ in 0..10 {
            assert_eq!(room_shard(room.as_str(), 7), first);
        }
        assert!(first < 7);
        assert_eq!(room_shard(room.as_str(), 1), 0);
    }

    #[test]
    fn shards_spread_rooms() {
        let mut counts = [0usize; 4];
        for room in rooms(400) {
            counts[room_shard(room.as_str(), 4) as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 50), "uneven spread: {counts:?}");
    }
}
