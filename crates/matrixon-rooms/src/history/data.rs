// =============================================================================
// Matrixon Matrix NextServer - Data Module
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
//   Database reads backing the room history cache.
//
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use matrixon_core::{RoomDomainOffset, StreamEvent};
use ruma::{OwnedRoomId, OwnedServerName, RoomId};

use crate::Result;

/// Database reads the room history cache is hydrated from.
#[async_trait]
pub trait Data: Send + Sync {
    /// The room's most recent `limit` events, newest first.
    async fn history_events(&self, room_id: &RoomId, limit: usize) -> Result<Vec<StreamEvent>>;

    /// Lowest offset still retained for the room.
    async fn output_min_stream(&self, room_id: &RoomId) -> Result<i64>;

    /// Highest offset per origin server for one room.
    async fn domain_max_offsets(&self, room_id: &RoomId) -> Result<Vec<(OwnedServerName, i64)>>;

    /// Latest offset of each listed room. Rooms without events are omitted.
    async fn room_last_offsets(&self, room_ids: &[OwnedRoomId]) -> Result<HashMap<OwnedRoomId, i64>>;

    /// Every `(room, origin server, max offset)` triple known to the room server.
    async fn rooms_domain_offsets(&self) -> Result<Vec<RoomDomainOffset>>;
}
