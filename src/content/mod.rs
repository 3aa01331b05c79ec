//! Turning fetched markup into display markup and speakable sentences.

mod normalizer;
mod segmenter;

pub use normalizer::{ContentError, ContentNormalizer, NormalizedContent, MIN_CONTENT_CHARS};
pub use segmenter::{SegmentError, Segmentation, SentenceSegmenter, MAX_UTTERANCE_CHARS};

/// Token joining paragraphs in the persisted plain-text stream.
pub const PARAGRAPH_DELIMITER: &str = "--####--";
