//! # gatekeeper-cli
//!
//! Command-line interface for the action gatekeeper.
//!
//! ## Commands
//!
//! - `gatekeeper serve`: Start the HTTP API
//! - `gatekeeper evaluate`: Evaluate one action against the configured store
//! - `gatekeeper logs`: Show recent decisions
//! - `gatekeeper pending`: Show suggestions awaiting resolution
//! - `gatekeeper actions`: List the action catalog
//! - `gatekeeper config`: Show or validate configuration

pub mod commands;

pub use commands::Cli;
