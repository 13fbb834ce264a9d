//! JSON-RPC API Layer
//!
//! Exposes the Tasklane queue manager over JSON-RPC 2.0, including a
//! subscription for queue and task change events.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
