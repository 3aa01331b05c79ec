use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Markup as delivered by the feed.
    pub raw_html: Option<String>,
    /// Display markup produced by extraction.
    pub cleaned_html: Option<String>,
    /// Delimiter-joined plain text handed to the segmenter. Empty means pending.
    pub content_text: Option<String>,
    pub summary: Option<String>,
    pub translated_title: Option<String>,
    pub translated_summary: Option<String>,
    pub translated_text: Option<String>,
    pub resume_position: usize,
    pub priority: i64,
    pub target_language: Option<String>,
    pub ai_cleaned: bool,
    pub ai_summarized: bool,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn has_content(&self) -> bool {
        self.content_text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }

    pub fn is_pending(&self) -> bool {
        !self.has_content() && self.priority > 0
    }
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_html: Option<String>,
    pub priority: i64,
}
