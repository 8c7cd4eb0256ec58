//! Matrixon Common
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//!
//! Shared error taxonomy for the sync cache crates.

pub mod error;

pub use error::{MatrixonError, Result};
