//! HTTP transport layer for the JSON-RPC wrappers
//!
//! Provides the external routing: the JSON-RPC endpoint on `/` and `/mcp`,
//! the health probe and the CORS handling shared by every route.

pub mod cors;
pub mod handlers;
