use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::controller::{LoopSignal, LoopState, SpeechLoopController};
use super::engine::EngineEvent;
use super::playlist::PlaylistCursor;
use super::SpeechError;
use crate::error::{AppError, Result};
use crate::models::{PlaybackCommand, PlaybackMode};

/// Text for one article in the requested variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    pub text: String,
    pub language: Option<String>,
    pub title: String,
}

/// Supplies content for playlist entries other than the one the
/// [`PlaybackCommand`] carried.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Falls back to the full text when the requested variant is missing.
    /// `None` means the article has no speakable content yet.
    async fn resolve(&self, article_id: i64, mode: PlaybackMode)
        -> Result<Option<ResolvedContent>>;
}

#[derive(Debug, Clone)]
pub enum PlaybackRequest {
    Play(PlaybackCommand),
    Pause,
    Resume,
    Stop,
    FastForward,
    FastRewind,
    NextParagraph,
    PreviousParagraph,
    SkipNext,
    SkipPrevious,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub state: LoopState,
    pub article_id: Option<i64>,
    pub title: Option<String>,
    pub sentence: usize,
    pub sentences: usize,
    pub playlist_position: usize,
    pub playlist_len: usize,
    /// Set when the last request failed hard; cleared by the next `Play`.
    pub error: Option<SpeechError>,
}

/// Cloneable front end of a running [`PlaybackService`].
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::Sender<PlaybackRequest>,
    status: watch::Receiver<PlaybackStatus>,
}

impl PlaybackHandle {
    pub async fn send(&self, request: PlaybackRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| SpeechError::Engine("playback service stopped".to_string()).into())
    }

    pub fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    /// Resolves once the playlist has been spoken to the end, or with the
    /// failure that stopped it.
    pub async fn finished(&self) -> Result<()> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| s.state == LoopState::Finished || s.error.is_some())
            .await
            .map_err(|_| SpeechError::Engine("playback service stopped".to_string()))?;
        let error = settled.error.clone();
        drop(settled);
        match error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn as_speech_error(error: AppError) -> SpeechError {
    match error {
        AppError::Speech(e) => e,
        other => SpeechError::Engine(other.to_string()),
    }
}

/// Owns the speech engine (through the controller) and the playlist. Requests
/// and engine events are handled one at a time on a single task.
pub struct PlaybackService {
    controller: SpeechLoopController,
    playlist: PlaylistCursor,
    resolver: Arc<dyn ContentResolver>,
    mode: PlaybackMode,
    title: Option<String>,
    error: Option<SpeechError>,
    status: watch::Sender<PlaybackStatus>,
}

impl PlaybackService {
    pub fn spawn(
        controller: SpeechLoopController,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        resolver: Arc<dyn ContentResolver>,
    ) -> (PlaybackHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::default());
        let service = Self {
            controller,
            playlist: PlaylistCursor::default(),
            resolver,
            mode: PlaybackMode::default(),
            title: None,
            error: None,
            status: status_tx,
        };
        let task = tokio::spawn(service.run(rx, events));
        (
            PlaybackHandle {
                tx,
                status: status_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<PlaybackRequest>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        loop {
            let result = tokio::select! {
                request = requests.recv() => match request {
                    None | Some(PlaybackRequest::Shutdown) => break,
                    Some(request) => self.handle_request(request).await,
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            };
            if let Err(e) = result {
                tracing::warn!("Playback error: {}", e);
                self.error = Some(as_speech_error(e));
            }
            self.publish();
        }

        self.controller.stop().await;
        self.publish();
        tracing::debug!("Playback service stopped");
    }

    async fn handle_request(&mut self, request: PlaybackRequest) -> Result<()> {
        let signal = match request {
            PlaybackRequest::Play(command) => {
                self.error = None;
                return self.play(command).await;
            }
            PlaybackRequest::Pause => self.controller.pause().await?,
            PlaybackRequest::Resume => self.controller.resume().await?,
            PlaybackRequest::Stop => {
                self.controller.stop().await;
                return Ok(());
            }
            PlaybackRequest::FastForward => self.controller.fast_forward().await?,
            PlaybackRequest::FastRewind => self.controller.fast_rewind().await?,
            PlaybackRequest::NextParagraph => self.controller.next_paragraph().await?,
            PlaybackRequest::PreviousParagraph => self.controller.previous_paragraph().await?,
            PlaybackRequest::SkipNext => {
                if self.playlist.skip_next() {
                    self.play_current_or_advance().await?;
                }
                return Ok(());
            }
            PlaybackRequest::SkipPrevious => {
                if self.playlist.skip_previous() {
                    self.play_current_or_advance().await?;
                }
                return Ok(());
            }
            PlaybackRequest::Shutdown => return Ok(()),
        };
        self.follow(signal).await
    }

    async fn handle_event(&mut self, event: EngineEvent) -> Result<()> {
        let signal = match event {
            EngineEvent::Initialized { ok } => self.controller.on_engine_initialized(ok).await?,
            EngineEvent::UtteranceDone { utterance_id } => {
                self.controller.on_utterance_done(&utterance_id).await?
            }
            EngineEvent::UtteranceError {
                utterance_id,
                message,
            } => {
                self.controller
                    .on_utterance_error(&utterance_id, &message)
                    .await?
            }
        };
        self.follow(signal).await
    }

    /// The command's text is spoken as given; the store is only consulted for
    /// later playlist entries.
    async fn play(&mut self, command: PlaybackCommand) -> Result<()> {
        self.mode = command.mode;
        self.playlist.set_playlist(command.playlist, command.article_id);
        self.title = Some(command.title);
        self.controller
            .load(command.article_id, &command.text, &command.language)
            .await?;
        let signal = self.controller.speak_next().await?;
        self.follow(signal).await
    }

    async fn follow(&mut self, signal: LoopSignal) -> Result<()> {
        if signal == LoopSignal::AdvancePlaylist {
            self.advance().await?;
        }
        Ok(())
    }

    async fn advance(&mut self) -> Result<()> {
        while self.playlist.skip_next() {
            if self.play_current().await? {
                return Ok(());
            }
        }
        tracing::info!("Reached the end of the playlist");
        Ok(())
    }

    async fn play_current_or_advance(&mut self) -> Result<()> {
        if !self.play_current().await? {
            self.advance().await?;
        }
        Ok(())
    }

    /// Loads and starts the playlist's current article. Returns false when it
    /// has nothing speakable so the caller can move on.
    async fn play_current(&mut self) -> Result<bool> {
        let Some(article_id) = self.playlist.current_id() else {
            return Ok(false);
        };
        let Some(content) = self.resolver.resolve(article_id, self.mode).await? else {
            tracing::info!("Article {} has no content yet, skipping", article_id);
            return Ok(false);
        };

        let language = content
            .language
            .unwrap_or_else(|| self.controller.default_language().to_string());
        if let Err(e) = self.controller.load(article_id, &content.text, &language).await {
            tracing::warn!("Skipping article {}: {}", article_id, e);
            return Ok(false);
        }
        self.title = Some(content.title);
        self.controller.speak_next().await?;
        Ok(true)
    }

    fn publish(&self) {
        self.status.send_replace(PlaybackStatus {
            state: self.controller.state(),
            article_id: self.controller.article_id(),
            title: self.title.clone(),
            sentence: self.controller.cursor(),
            sentences: self.controller.sentence_count(),
            playlist_position: self.playlist.position(),
            playlist_len: self.playlist.len(),
            error: self.error.clone(),
        });
    }
}
