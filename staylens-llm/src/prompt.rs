//! Prompt construction for listing analysis.

use staylens_core::{AnalysisBatch, FeedbackItem, ListingId};
use std::fmt::Write;

/// Longest item text sent to a model; longer content is cut at a char boundary.
pub const MAX_ITEM_CHARS: usize = 1_000;

pub const SYSTEM_PROMPT: &str = "You analyze guest feedback for a short-term rental listing. \
Read the reviews and guest messages and identify concrete quality problems the host can fix. \
Respond with ONLY a JSON object of the form \
{\"quality_rating\": \"Good\" | \"Fair\" | \"Poor\", \
\"issues\": [{\"title\": \"...\", \"details\": \"...\"}], \
\"action_items\": [\"...\"]}. \
Use short, stable issue titles such as \"Cleanliness\" or \"Wi-Fi\". \
Return empty arrays when there is nothing to report.";

/// System and user messages for one analysis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Render `batch` into a prompt, one line per item.
pub fn build_prompt(listing_id: &ListingId, batch: &AnalysisBatch) -> Prompt {
    let mut user = format!("Listing: {}\n", listing_id);

    let _ = writeln!(user, "\nReviews ({}):", batch.reviews.len());
    if batch.reviews.is_empty() {
        user.push_str("(none)\n");
    }
    for review in &batch.reviews {
        push_item(&mut user, review, review.rating.map(|r| format!("rating {:.1}", r)));
    }

    let _ = writeln!(user, "\nMessages ({}):", batch.messages.len());
    if batch.messages.is_empty() {
        user.push_str("(none)\n");
    }
    for message in &batch.messages {
        push_item(&mut user, message, message.sender.clone());
    }

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn push_item(out: &mut String, item: &FeedbackItem, meta: Option<String>) {
    let text = truncate_chars(item.content.trim(), MAX_ITEM_CHARS).replace('\n', " ");
    let _ = match meta {
        Some(meta) => writeln!(out, "- [{}] {}", meta, text),
        None => writeln!(out, "- {}", text),
    };
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
