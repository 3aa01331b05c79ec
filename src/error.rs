use thiserror::Error;

use crate::content::{ContentError, SegmentError};
use crate::extraction::FetchError;
use crate::speech::SpeechError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database connection error: {0}")]
    DatabaseConnection(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Segmentation error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Language model API error: {0}")]
    LanguageModel(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
