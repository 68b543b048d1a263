// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category assigned when no keyword rule matches.
pub const CATCH_ALL_CATEGORY: &str = "all";

/// One feed entry after parsing, before cleaning/classification.
/// Text fields still carry markup and entities; URL fields are as found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub pub_date: Option<String>,
    pub guid: Option<String>,
    /// `media:content` entries flagged as images, in document order.
    pub media_images: Vec<String>,
    /// `enclosure` entries with an `image/*` type.
    pub enclosure_images: Vec<String>,
    /// Plain `<image>` field.
    pub image: Option<String>,
    /// Platform extensions: media:thumbnail, itunes:image, featured-image fields.
    pub platform_images: Vec<String>,
}

/// The unit stored in a snapshot and served by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    pub full_content: String,
    pub has_full_content: bool,
    pub pub_date: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub source_id: String,
    pub category: String,
    pub priority: bool,
    pub relevance_score: u8,
    pub keywords: Vec<String>,
    pub guid: String,
    pub image_url: Option<String>,
    pub optimized_image_url: Option<String>,
    pub word_count: usize,
}

impl Article {
    pub fn is_uncategorized(&self) -> bool {
        self.category == CATCH_ALL_CATEGORY
    }
}

/// Why one source contributed nothing to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    pub source_id: String,
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSuccess {
    pub source_id: String,
    pub source: String,
    /// Items parsed from the feed (before the per-source cap).
    pub parsed: usize,
    /// Articles that survived normalization.
    pub accepted: usize,
}
