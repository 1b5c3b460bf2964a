//! Multi-host execution, result shaping and the tools built on them

pub mod aggregate;
pub mod executor;
pub mod output;
pub mod tools;
pub mod utils;
