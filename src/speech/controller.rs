use std::sync::Arc;

use async_trait::async_trait;

use super::engine::{LanguageStatus, SpeechEngine};
use super::segments::PlaybackSegmentState;
use super::SpeechError;
use crate::content::SentenceSegmenter;
use crate::error::Result;

/// Where the sentence cursor of each article is persisted.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn resume_position(&self, article_id: i64) -> Result<Option<usize>>;

    async fn save_resume_position(&self, article_id: i64, position: usize) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    Preparing,
    Ready,
    Speaking,
    Paused,
    Finished,
}

/// What the owner of the controller should do after a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// Sentence `index` started; highlight it.
    Spoke { index: usize },
    /// Cursor moved without speaking (playback is paused).
    Positioned { index: usize },
    /// The engine is not initialized yet; the request replays once it is.
    Deferred,
    /// The article is done; move on to the next playlist entry.
    AdvancePlaylist,
    Ignored,
}

/// Drives the speech engine one sentence at a time.
///
/// Exactly one utterance is outstanding at any time and the cursor advances
/// only on that utterance's completion. Every cursor change is written to the
/// [`ResumeStore`] before the call returns.
pub struct SpeechLoopController {
    engine: Box<dyn SpeechEngine>,
    resume: Arc<dyn ResumeStore>,
    segmenter: SentenceSegmenter,
    default_language: String,
    state: LoopState,
    segments: PlaybackSegmentState,
    article_id: Option<i64>,
    cursor: usize,
    engine_ready: bool,
    deferred_speak: bool,
    current_utterance: Option<String>,
    /// Utterance cut short by navigation; its completion must not advance.
    interrupted_utterance: Option<String>,
    utterance_seq: u64,
}

impl SpeechLoopController {
    pub fn new(
        engine: Box<dyn SpeechEngine>,
        resume: Arc<dyn ResumeStore>,
        segmenter: SentenceSegmenter,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            resume,
            segmenter,
            default_language: default_language.into(),
            state: LoopState::Idle,
            segments: PlaybackSegmentState::default(),
            article_id: None,
            cursor: 0,
            engine_ready: false,
            deferred_speak: false,
            current_utterance: None,
            interrupted_utterance: None,
            utterance_seq: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn article_id(&self) -> Option<i64> {
        self.article_id
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn sentence_count(&self) -> usize {
        self.segments.len()
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn is_engine_ready(&self) -> bool {
        self.engine_ready
    }

    /// Loads `text` for `article_id`, replacing whatever was playing.
    ///
    /// Reloading the article already loaded keeps the cursor; any other
    /// article starts from its persisted position.
    pub async fn load(&mut self, article_id: i64, text: &str, language: &str) -> Result<()> {
        self.interrupt().await;
        self.state = LoopState::Preparing;
        self.segments.clear();

        if text.trim().is_empty() {
            self.state = LoopState::Idle;
            return Err(SpeechError::EmptyText.into());
        }
        let segmentation = match self.segmenter.segment(text) {
            Ok(segmentation) => segmentation,
            Err(e) => {
                self.state = LoopState::Idle;
                return Err(SpeechError::from(e).into());
            }
        };
        self.segments.load(segmentation);

        let last = self.segments.len().saturating_sub(1);
        let cursor = if self.article_id == Some(article_id) {
            self.cursor
        } else {
            self.resume.resume_position(article_id).await?.unwrap_or(0)
        };
        self.article_id = Some(article_id);
        self.cursor = cursor.min(last);

        self.apply_language(language).await;
        self.state = LoopState::Ready;
        tracing::debug!(
            "Loaded article {} with {} sentences at {}",
            article_id,
            self.segments.len(),
            self.cursor
        );
        Ok(())
    }

    async fn apply_language(&mut self, language: &str) {
        match self.engine.set_language(language).await {
            LanguageStatus::Supported => {}
            status => {
                tracing::warn!(
                    "Language {} not usable ({:?}), falling back to {}",
                    language,
                    status,
                    self.default_language
                );
                let fallback = self.default_language.clone();
                if self.engine.set_language(&fallback).await != LanguageStatus::Supported {
                    tracing::warn!("Default language {} not usable either", fallback);
                }
            }
        }
    }

    /// Speaks the sentence at the cursor, or finishes the article when the
    /// cursor has run past the last sentence.
    pub async fn speak_next(&mut self) -> Result<LoopSignal> {
        if self.state == LoopState::Preparing {
            return Ok(LoopSignal::Ignored);
        }
        let Some(article_id) = self.article_id else {
            return Err(SpeechError::NotReady.into());
        };
        if self.segments.is_empty() {
            return Err(SpeechError::NotReady.into());
        }
        if !self.engine_ready {
            self.deferred_speak = true;
            return Ok(LoopSignal::Deferred);
        }

        if self.cursor >= self.segments.len() {
            self.current_utterance = None;
            self.state = LoopState::Finished;
            self.set_cursor(0).await?;
            tracing::debug!("Article {} finished", article_id);
            return Ok(LoopSignal::AdvancePlaylist);
        }

        let index = self.cursor;
        let sentence = self.segments.sentence(index).unwrap_or_default().to_string();
        self.utterance_seq += 1;
        let utterance_id = format!("{}-{}-{}", article_id, index, self.utterance_seq);

        self.engine.speak(&sentence, &utterance_id).await?;
        self.current_utterance = Some(utterance_id);
        self.state = LoopState::Speaking;
        self.persist().await?;
        Ok(LoopSignal::Spoke { index })
    }

    pub async fn on_engine_initialized(&mut self, ok: bool) -> Result<LoopSignal> {
        if !ok {
            tracing::error!("Speech engine failed to initialize");
            self.engine_ready = false;
            return Ok(LoopSignal::Ignored);
        }
        self.engine_ready = true;
        if std::mem::take(&mut self.deferred_speak) {
            return self.speak_next().await;
        }
        Ok(LoopSignal::Ignored)
    }

    pub async fn on_utterance_done(&mut self, utterance_id: &str) -> Result<LoopSignal> {
        if self.interrupted_utterance.as_deref() == Some(utterance_id) {
            self.interrupted_utterance = None;
            return Ok(LoopSignal::Ignored);
        }
        if self.current_utterance.as_deref() != Some(utterance_id) {
            tracing::debug!("Ignoring stale completion {}", utterance_id);
            return Ok(LoopSignal::Ignored);
        }

        self.current_utterance = None;
        self.cursor += 1;
        self.speak_next().await
    }

    /// A failed sentence is skipped rather than retried.
    pub async fn on_utterance_error(&mut self, utterance_id: &str, message: &str) -> Result<LoopSignal> {
        if self.current_utterance.as_deref() == Some(utterance_id) {
            tracing::warn!("Utterance {} failed: {}", utterance_id, message);
        }
        self.on_utterance_done(utterance_id).await
    }

    pub async fn fast_forward(&mut self) -> Result<LoopSignal> {
        if self.article_id.is_none() || self.segments.is_empty() {
            return Ok(LoopSignal::Ignored);
        }
        let target = (self.cursor + 1).min(self.segments.len());
        self.jump_to(target).await
    }

    pub async fn fast_rewind(&mut self) -> Result<LoopSignal> {
        if self.article_id.is_none() || self.cursor == 0 {
            return Ok(LoopSignal::Ignored);
        }
        self.jump_to(self.cursor - 1).await
    }

    pub async fn next_paragraph(&mut self) -> Result<LoopSignal> {
        if self.article_id.is_none() || self.segments.is_empty() {
            return Ok(LoopSignal::Ignored);
        }
        let target = self
            .segments
            .next_paragraph_start(self.cursor)
            .unwrap_or(self.segments.len());
        self.jump_to(target).await
    }

    pub async fn previous_paragraph(&mut self) -> Result<LoopSignal> {
        if self.article_id.is_none() {
            return Ok(LoopSignal::Ignored);
        }
        match self.segments.previous_paragraph_start(self.cursor) {
            Some(target) => self.jump_to(target).await,
            None => Ok(LoopSignal::Ignored),
        }
    }

    pub async fn pause(&mut self) -> Result<LoopSignal> {
        if self.state != LoopState::Speaking {
            return Ok(LoopSignal::Ignored);
        }
        self.interrupt().await;
        self.state = LoopState::Paused;
        Ok(LoopSignal::Positioned { index: self.cursor })
    }

    /// Re-speaks the sentence that was interrupted by [`pause`](Self::pause).
    pub async fn resume(&mut self) -> Result<LoopSignal> {
        match self.state {
            LoopState::Paused | LoopState::Ready => self.speak_next().await,
            _ => Ok(LoopSignal::Ignored),
        }
    }

    /// Stops speaking. The persisted position is left as it is.
    pub async fn stop(&mut self) {
        self.interrupt().await;
        self.deferred_speak = false;
        self.state = LoopState::Idle;
    }

    async fn jump_to(&mut self, target: usize) -> Result<LoopSignal> {
        let paused = self.state == LoopState::Paused;
        self.interrupt().await;

        if paused && target < self.segments.len() {
            self.set_cursor(target).await?;
            return Ok(LoopSignal::Positioned { index: target });
        }
        self.cursor = target;
        self.speak_next().await
    }

    /// Stops the in-flight utterance so its completion cannot advance the cursor.
    async fn interrupt(&mut self) {
        if let Some(utterance) = self.current_utterance.take() {
            self.interrupted_utterance = Some(utterance);
            self.engine.stop().await;
        }
    }

    async fn set_cursor(&mut self, cursor: usize) -> Result<()> {
        self.cursor = cursor;
        self.persist().await
    }

    async fn persist(&mut self) -> Result<()> {
        if let Some(article_id) = self.article_id {
            let resume = Arc::clone(&self.resume);
            resume.save_resume_position(article_id, self.cursor).await?;
        }
        Ok(())
    }
}
