//! Classcast - ABR HLS transcoding and live ingest orchestration
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod live;
pub mod preview;
pub mod server;
pub mod supervisor;

pub use error::{Result, StreamError};
