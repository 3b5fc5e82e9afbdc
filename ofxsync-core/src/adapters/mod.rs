//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the SyncStore port
//! - reqwest HTTP client for the Transport port
//!
//! `mock_server` is a local OFX endpoint for tests.

pub mod duckdb;
pub mod http;
pub mod mock_server;
