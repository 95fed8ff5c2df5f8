//! OpenAI provider implementation

pub mod analysis;
pub mod client;
pub mod types;

pub use analysis::OpenAIAnalysisProvider;
pub use client::OpenAIClient;
