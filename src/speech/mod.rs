//! Sentence-at-a-time speech playback.

mod controller;
mod engine;
mod playlist;
mod segments;
mod service;

pub use controller::{LoopSignal, LoopState, ResumeStore, SpeechLoopController};
pub use engine::{EngineEvent, EspeakEngine, LanguageStatus, SpeechEngine};
pub use playlist::PlaylistCursor;
pub use segments::PlaybackSegmentState;
pub use service::{
    ContentResolver, PlaybackHandle, PlaybackRequest, PlaybackService, PlaybackStatus,
    ResolvedContent,
};

use thiserror::Error;

use crate::content::SegmentError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("speech engine is not ready")]
    NotReady,

    #[error("speech engine error: {0}")]
    Engine(String),

    #[error("nothing to speak")]
    EmptyText,

    #[error(transparent)]
    Segment(#[from] SegmentError),
}
