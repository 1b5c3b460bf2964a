//! HTTP transport: health, discovery and the `/mcp` endpoint

pub mod handlers;
