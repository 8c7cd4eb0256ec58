//! Matrixon Core Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//!
//! Fundamental types shared by the sync cache crates: the room event model
//! carried through timelines, the server configuration, and the read
//! observability hook.
//!
//! # Examples
//! ```rust
//! use matrixon_core::config::ServerConfig;
//!
//! let config = ServerConfig::default();
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod traits;
pub mod types;

pub use matrixon_common::{MatrixonError, Result};
pub use traits::{NoopRecorder, QueryHitRecorder, QuerySource};
pub use types::{ClientEvent, EventContent, RoomDomainOffset, StreamEvent};
