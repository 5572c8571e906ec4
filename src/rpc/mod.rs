//! Admin RPC surface: authorization, method handlers, and the TCP transport.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod server;

pub use server::{RpcContext, RpcServer};
