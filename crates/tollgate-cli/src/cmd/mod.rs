pub mod config;
pub mod mcp;
pub mod serve;
pub mod trust;
