//! Staylens Core - Insight Types
//!
//! Data structures shared by every Staylens crate: feedback items, the
//! processed-item ledger record, the cached insight record and the result
//! returned to callers. The only behavior here is the pure merge policy
//! (see [`merge`]) and configuration validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod config;
pub mod error;
pub mod merge;

pub use config::{
    InsightConfig, PersistenceBackend, PostgresConfig, ProviderConfig, ProviderKind,
    StaylensConfig,
};
pub use error::{
    AnalysisError, ConfigError, StaylensError, StaylensResult, StorageError, ValidationError,
};
pub use merge::{merge_analysis, merge_rating};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a feedback item. Unique within its [`ItemKind`].
pub type ItemId = String;

/// Identifier of a listing (the subject insights are scoped to).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListingId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ListingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ListingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Kind of feedback item. Identifiers are only unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Review,
    Message,
}

impl ItemKind {
    /// Every kind, in the order the change detector walks them.
    pub const ALL: [ItemKind; 2] = [ItemKind::Review, ItemKind::Message];

    /// Stable string form used in persisted ledger rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Review => "review",
            ItemKind::Message => "message",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review" => Ok(ItemKind::Review),
            "message" => Ok(ItemKind::Message),
            other => Err(ValidationError::UnknownItemKind {
                value: other.to_string(),
            }),
        }
    }
}

/// Overall quality rating of a listing.
///
/// Ordered `Poor < Fair < Good`; `Fair` is the neutral default the analysis
/// service falls back to when it has little to go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityRating {
    Poor,
    Fair,
    Good,
}

impl QualityRating {
    /// Ordinal score: Poor = 1, Fair = 2, Good = 3.
    pub fn score(&self) -> u8 {
        match self {
            QualityRating::Poor => 1,
            QualityRating::Fair => 2,
            QualityRating::Good => 3,
        }
    }

    /// The neutral rating.
    pub fn is_default(&self) -> bool {
        matches!(self, QualityRating::Fair)
    }

    /// Case-insensitive parse used when normalizing provider output.
    /// Returns `None` for anything that is not one of the three ratings.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "good" => Some(QualityRating::Good),
            "fair" => Some(QualityRating::Fair),
            "poor" => Some(QualityRating::Poor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRating::Poor => "Poor",
            QualityRating::Fair => "Fair",
            QualityRating::Good => "Good",
        }
    }
}

impl fmt::Display for QualityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FEEDBACK ITEMS
// ============================================================================

/// One review or message, as read from the host's dataset.
///
/// Immutable once fetched; the insight core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub listing_id: ListingId,
    pub content: String,
    /// Star rating, reviews only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    /// Sender name or role, messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub created_at: Timestamp,
}

impl FeedbackItem {
    /// Build a review item.
    pub fn review(
        item_id: impl Into<ItemId>,
        listing_id: impl Into<ListingId>,
        content: impl Into<String>,
        rating: Option<f32>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            kind: ItemKind::Review,
            listing_id: listing_id.into(),
            content: content.into(),
            rating,
            sender: None,
            created_at,
        }
    }

    /// Build a message item.
    pub fn message(
        item_id: impl Into<ItemId>,
        listing_id: impl Into<ListingId>,
        content: impl Into<String>,
        sender: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            kind: ItemKind::Message,
            listing_id: listing_id.into(),
            content: content.into(),
            rating: None,
            sender,
            created_at,
        }
    }
}

/// The batch handed to the analysis service: the unseen items of one
/// listing, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBatch {
    pub reviews: Vec<FeedbackItem>,
    pub messages: Vec<FeedbackItem>,
}

impl AnalysisBatch {
    pub fn new(reviews: Vec<FeedbackItem>, messages: Vec<FeedbackItem>) -> Self {
        Self { reviews, messages }
    }

    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty() && self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reviews.len() + self.messages.len()
    }

    /// Items of one kind.
    pub fn of_kind(&self, kind: ItemKind) -> &[FeedbackItem] {
        match kind {
            ItemKind::Review => &self.reviews,
            ItemKind::Message => &self.messages,
        }
    }
}

/// Live item counts per kind, refreshed into every returned result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub reviews: u64,
    pub messages: u64,
}

// ============================================================================
// ANALYSIS RESULT
// ============================================================================

/// Title used for the synthetic issue of a degraded analysis.
pub const ANALYSIS_ERROR_TITLE: &str = "Analysis Error";

/// One detected quality issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,
    pub details: String,
}

impl Issue {
    pub fn new(title: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            details: details.into(),
        }
    }
}

/// Structured output of the analysis service after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub quality_rating: Option<QualityRating>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

impl Analysis {
    /// Placeholder for a listing with nothing analyzed yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Placeholder substituted when the analysis call fails.
    pub fn degraded(reason: impl fmt::Display) -> Self {
        Self {
            quality_rating: Some(QualityRating::Fair),
            issues: vec![Issue::new(
                ANALYSIS_ERROR_TITLE,
                format!("Insights are temporarily unavailable: {}", reason),
            )],
            action_items: vec!["Retry the analysis later with a forced refresh".to_string()],
        }
    }

    /// True when this analysis carries no rating, issues or action items.
    pub fn is_empty(&self) -> bool {
        self.quality_rating.is_none() && self.issues.is_empty() && self.action_items.is_empty()
    }

    /// True when this analysis is the degraded placeholder.
    pub fn is_degraded(&self) -> bool {
        self.issues.iter().any(|issue| issue.title == ANALYSIS_ERROR_TITLE)
    }
}

// ============================================================================
// PERSISTED RECORDS
// ============================================================================

/// Ledger row: item `item_id` of `kind` has been folded into the cached
/// analysis of `listing_id`. Only ever inserted or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub listing_id: ListingId,
    pub kind: ItemKind,
    pub item_id: ItemId,
    pub analyzed_at: Timestamp,
}

/// Cached analysis of one listing. Replaced wholesale on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub listing_id: ListingId,
    #[serde(flatten)]
    pub analysis: Analysis,
    pub last_updated: Timestamp,
    /// Live review count at the time of the last write.
    pub total_reviews_analyzed: u64,
    /// Live message count at the time of the last write.
    pub total_messages_analyzed: u64,
}

impl InsightRecord {
    pub fn new(
        listing_id: ListingId,
        analysis: Analysis,
        counts: ItemCounts,
        last_updated: Timestamp,
    ) -> Self {
        Self {
            listing_id,
            analysis,
            last_updated,
            total_reviews_analyzed: counts.reviews,
            total_messages_analyzed: counts.messages,
        }
    }

    /// Convert to the caller-facing result, substituting live counts.
    pub fn to_result(&self, live: ItemCounts) -> InsightResult {
        InsightResult {
            analysis: self.analysis.clone(),
            last_analyzed: Some(self.last_updated),
            total_reviews_analyzed: live.reviews,
            total_messages_analyzed: live.messages,
        }
    }
}

/// Result returned by `get_insights`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightResult {
    #[serde(flatten)]
    pub analysis: Analysis,
    /// ISO-8601 timestamp of the analysis, absent for the empty placeholder.
    pub last_analyzed: Option<Timestamp>,
    pub total_reviews_analyzed: u64,
    pub total_messages_analyzed: u64,
}

impl InsightResult {
    /// Empty placeholder: no rating, no issues, no action items.
    pub fn placeholder(live: ItemCounts) -> Self {
        Self {
            analysis: Analysis::empty(),
            last_analyzed: None,
            total_reviews_analyzed: live.reviews,
            total_messages_analyzed: live.messages,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.analysis.is_degraded()
    }
}

// ============================================================================
// TESTS
// ============================================================================
