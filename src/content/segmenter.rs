use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use super::PARAGRAPH_DELIMITER;

/// Longest input most synthesis engines accept for a single utterance.
pub const MAX_UTTERANCE_CHARS: usize = 4000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("too few sentences to narrate ({sentences})")]
    TooShort { sentences: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub sentences: Vec<String>,
    /// Index into `sentences` where each paragraph begins, ascending.
    pub paragraph_starts: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    max_chars: usize,
}

impl SentenceSegmenter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(2),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn segment(&self, text: &str) -> Result<Segmentation, SegmentError> {
        let mut sentences = Vec::new();
        let mut paragraph_starts = Vec::new();

        for paragraph in text
            .split(PARAGRAPH_DELIMITER)
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            paragraph_starts.push(sentences.len());
            if paragraph.chars().count() < self.max_chars {
                sentences.push(paragraph.to_string());
            } else {
                self.split_long(paragraph, &mut sentences);
            }
        }

        if sentences.len() < 2 {
            return Err(SegmentError::TooShort {
                sentences: sentences.len(),
            });
        }

        // Repeated until stable so segmenting the output again changes nothing.
        while strip_duplicated_title(&mut sentences, &mut paragraph_starts) {}
        if sentences.is_empty() {
            return Err(SegmentError::TooShort { sentences: 0 });
        }

        Ok(Segmentation {
            sentences,
            paragraph_starts,
        })
    }

    fn split_long(&self, paragraph: &str, out: &mut Vec<String>) {
        for sentence in paragraph
            .split_sentence_bounds()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            if sentence.chars().count() < self.max_chars {
                out.push(sentence.to_string());
            } else {
                self.split_words(sentence, out);
            }
        }
    }

    fn split_words(&self, sentence: &str, out: &mut Vec<String>) {
        let limit = self.max_chars - 1;
        let mut chunk = String::new();
        let mut chunk_chars = 0;

        for word in sentence.split_word_bounds() {
            let word_chars = word.chars().count();
            if chunk_chars + word_chars > limit && !chunk.trim().is_empty() {
                out.push(chunk.trim().to_string());
                chunk.clear();
                chunk_chars = 0;
            }
            if word_chars > limit {
                // A single unbreakable run; cut it on character boundaries.
                let chars: Vec<char> = word.chars().collect();
                for piece in chars.chunks(limit) {
                    let piece: String = piece.iter().collect();
                    if !piece.trim().is_empty() {
                        out.push(piece.trim().to_string());
                    }
                }
                continue;
            }
            chunk.push_str(word);
            chunk_chars += word_chars;
        }

        if !chunk.trim().is_empty() {
            out.push(chunk.trim().to_string());
        }
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(MAX_UTTERANCE_CHARS)
    }
}

fn comparable(sentence: &str) -> String {
    sentence
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase()
}

fn same_sentence(a: &str, b: &str) -> bool {
    let a = comparable(a);
    !a.is_empty() && a == comparable(b)
}

fn repeats_itself(unit: &str) -> bool {
    let parts: Vec<&str> = unit
        .split_sentence_bounds()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    parts.len() == 2 && same_sentence(parts[0], parts[1])
}

/// Pages often open with the headline twice; it is announced separately, so both
/// copies go. Returns whether anything was removed.
fn strip_duplicated_title(sentences: &mut Vec<String>, paragraph_starts: &mut Vec<usize>) -> bool {
    let removed = if sentences.len() >= 2 && same_sentence(&sentences[0], &sentences[1]) {
        2
    } else if sentences.first().is_some_and(|first| repeats_itself(first)) {
        1
    } else {
        0
    };
    if removed == 0 {
        return false;
    }

    tracing::debug!("Dropping duplicated title: {:?}", sentences[0]);
    sentences.drain(..removed);

    let remaining = sentences.len();
    let mut starts: Vec<usize> = paragraph_starts
        .iter()
        .map(|start| start.saturating_sub(removed))
        .filter(|start| *start < remaining)
        .collect();
    starts.dedup();
    *paragraph_starts = starts;
    true
}
