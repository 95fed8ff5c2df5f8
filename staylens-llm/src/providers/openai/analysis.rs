//! OpenAI chat-completions analysis provider

use super::client::OpenAIClient;
use super::types::{CompletionRequest, CompletionResponse, Message, ResponseFormat};
use crate::normalize::parse_analysis;
use crate::prompt::build_prompt;
use crate::providers::invalid_response;
use crate::AnalysisProvider;
use async_trait::async_trait;
use staylens_core::{Analysis, AnalysisBatch, ListingId, StaylensResult};

/// Listing analysis backed by an OpenAI chat model.
pub struct OpenAIAnalysisProvider {
    client: OpenAIClient,
    model: String,
    max_tokens: u32,
}

impl OpenAIAnalysisProvider {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
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

    fn build_request(&self, listing_id: &ListingId, batch: &AnalysisBatch) -> CompletionRequest {
        let prompt = build_prompt(listing_id, batch);
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::system(prompt.system), Message::user(prompt.user)],
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.2),
            response_format: Some(ResponseFormat::json_object()),
        }
    }
}

#[async_trait]
impl AnalysisProvider for OpenAIAnalysisProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(&self, listing_id: &ListingId, batch: &AnalysisBatch) -> StaylensResult<Analysis> {
        let request = self.build_request(listing_id, batch);
        let response: CompletionResponse = self.client.request("chat/completions", &request).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| invalid_response(self.name(), "response has no message content"))?;

        Ok(parse_analysis(self.name(), &text)?)
    }
}

impl std::fmt::Debug for OpenAIAnalysisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIAnalysisProvider")
            .field("model", &self.model)
            .field("client", &self.client)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use staylens_core::FeedbackItem;

    #[test]
    fn test_request_shape() {
        let provider = OpenAIAnalysisProvider::new(OpenAIClient::new("key", 60), "gpt-4o-mini");
        let batch = AnalysisBatch::new(
            vec![FeedbackItem::review("r1", "L-1", "Spotless", Some(5.0), Utc::now())],
            Vec::new(),
        );
        let request = provider.build_request(&ListingId::new("L-1"), &batch);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json["messages"][1]["content"].as_str().unwrap().contains("Spotless"));
        assert_eq!(json["response_format"]["type"], "json_object");
    }
}
