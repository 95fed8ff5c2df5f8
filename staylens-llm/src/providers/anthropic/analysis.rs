//! Anthropic (Claude) analysis provider

use super::client::AnthropicClient;
use super::types::{ContentBlock, Message, MessageRequest, MessageResponse};
use crate::normalize::parse_analysis;
use crate::prompt::build_prompt;
use crate::providers::invalid_response;
use crate::AnalysisProvider;
use async_trait::async_trait;
use staylens_core::{Analysis, AnalysisBatch, ListingId, StaylensResult};

/// Listing analysis backed by a Claude model.
pub struct AnthropicAnalysisProvider {
    client: AnthropicClient,
    model: String,
    max_tokens: u32,
}

impl AnthropicAnalysisProvider {
    /// # Arguments
    /// * `client` - configured API client
    /// * `model` - Model name (e.g., "claude-3-5-haiku-20241022")
    pub fn new(client: AnthropicClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 1_500,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, listing_id: &ListingId, batch: &AnalysisBatch) -> MessageRequest {
        let prompt = build_prompt(listing_id, batch);
        MessageRequest {
            model: self.model.clone(),
            system: Some(prompt.system),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.user,
            }],
            max_tokens: self.max_tokens,
            temperature: Some(0.2),
        }
    }

    /// Concatenate the text blocks of a reply.
    fn extract_text(content: Vec<ContentBlock>) -> String {
        content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl AnalysisProvider for AnthropicAnalysisProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn analyze(&self, listing_id: &ListingId, batch: &AnalysisBatch) -> StaylensResult<Analysis> {
        let request = self.build_request(listing_id, batch);
        let response: MessageResponse = self.client.request("messages", &request).await?;

        let text = Self::extract_text(response.content);
        if text.trim().is_empty() {
            return Err(invalid_response(self.name(), "response has no text content"));
        }
        Ok(parse_analysis(self.name(), &text)?)
    }
}

impl std::fmt::Debug for AnthropicAnalysisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAnalysisProvider")
            .field("model", &self.model)
            .finish()
    }
}
