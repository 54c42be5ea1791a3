pub mod breakers;
pub mod decisions;
pub mod mcp;
