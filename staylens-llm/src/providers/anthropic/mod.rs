//! Anthropic provider implementation

pub mod analysis;
pub mod client;
pub mod types;

pub use analysis::AnthropicAnalysisProvider;
pub use client::AnthropicClient;
