//! Model Context Protocol over JSON-RPC: envelopes, negotiation and dispatch

pub mod rpc;
pub mod server;
