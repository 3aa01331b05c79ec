use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub language: Option<String>,
    /// Learned when a direct fetch yields unusable content. Never cleared.
    pub requires_render: bool,
    pub authenticated: bool,
    pub preload: bool,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    pub fn needs_sandboxed_render(&self) -> bool {
        self.requires_render || self.authenticated
    }
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub title: String,
    pub url: String,
    pub language: Option<String>,
    pub authenticated: bool,
    pub preload: bool,
}
