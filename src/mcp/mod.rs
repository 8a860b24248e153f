//! JSON-RPC 2.0 handling for the tool-invocation protocol
//!
//! `rpc` builds response envelopes and maps errors to codes; `server` holds the
//! dispatcher that validates requests and routes methods.

pub mod rpc;
pub mod server;
