//! Agent RPC dispatcher: JSON-RPC 2.0 over line-delimited standard streams.

pub mod protocol;
pub mod server;
pub mod tasks;
