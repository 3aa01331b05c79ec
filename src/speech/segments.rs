use crate::content::Segmentation;

/// Sentences of the loaded article plus the index of each paragraph's first
/// sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSegmentState {
    sentences: Vec<String>,
    paragraph_starts: Vec<usize>,
}

impl PlaybackSegmentState {
    pub fn load(&mut self, segmentation: Segmentation) {
        self.sentences = segmentation.sentences;
        self.paragraph_starts = segmentation.paragraph_starts;
    }

    pub fn clear(&mut self) {
        self.sentences.clear();
        self.paragraph_starts.clear();
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentence(&self, index: usize) -> Option<&str> {
        self.sentences.get(index).map(String::as_str)
    }

    /// First sentence of the paragraph after the one holding `cursor`.
    pub fn next_paragraph_start(&self, cursor: usize) -> Option<usize> {
        self.paragraph_starts.iter().copied().find(|&start| start > cursor)
    }

    /// Start of the paragraph holding `cursor`, or of the one before it when
    /// `cursor` already sits on a paragraph start.
    pub fn previous_paragraph_start(&self, cursor: usize) -> Option<usize> {
        self.paragraph_starts
            .iter()
            .copied()
            .rev()
            .find(|&start| start < cursor)
    }
}
