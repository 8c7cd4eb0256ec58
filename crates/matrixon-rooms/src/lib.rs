// =============================================================================
// Matrixon Rooms Service Library
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
//   Room timeline cache for sync and backfill. Holds bounded per-room event
//   logs hydrated lazily from storage, and tracks the stream positions
//   incremental sync and federation backfill are driven by.
//
// =============================================================================

pub mod history;
pub mod sharding;
pub mod timeline;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use matrixon_common::{MatrixonError, Result};

pub use history::{
    Data, PeerOffsets, PrimeOutcome, RoomHistoryLoadedData, RoomHistoryRepo, RoomLatestOffsets,
};
pub use sharding::ShardingFilter;
pub use timeline::{Timeline, TimelineRepo};
