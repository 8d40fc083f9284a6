//! Command implementations for the CLI
//!
//! - start: Start the insights server
//! - test: Test configuration validity
//! - config: Configuration display
//! - search: Query stored request logs

pub mod config;
pub mod search;
pub mod start;
