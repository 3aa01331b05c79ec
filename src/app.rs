use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use speedy_narrator::ai::{
    AiChain, ClaudeClient, CleaningStage, LanguageModel, PipelineStage, SummaryStage,
    TranslationStage,
};
use speedy_narrator::config::Config;
use speedy_narrator::content::SentenceSegmenter;
use speedy_narrator::db::Repository;
use speedy_narrator::error::{AppError, Result};
use speedy_narrator::extraction::{
    DirectFetch, DrainReport, ExtractionCoordinator, RenderHost, RendererFactory,
    SandboxedRenderFetch, UnconfiguredRenderer, WebDriverFactory,
};
use speedy_narrator::models::{PlaybackCommand, PlaybackMode};
use speedy_narrator::speech::{
    ContentResolver, EspeakEngine, PlaybackRequest, PlaybackService,
    SpeechLoopController,
};

pub struct App {
    config: Config,
    pub repository: Arc<Repository>,
    coordinator: Arc<ExtractionCoordinator>,
    chain: Option<Arc<AiChain>>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path).await?);
        let settings = &config.extraction;

        let direct = DirectFetch::new(settings)?;
        let factory: Arc<dyn RendererFactory> = match config.webdriver_url.as_ref() {
            Some(url) => Arc::new(WebDriverFactory::new(url.clone(), settings.user_agent.clone())),
            None => Arc::new(UnconfiguredRenderer),
        };
        let render = SandboxedRenderFetch::new(RenderHost::spawn(factory, settings), settings);

        let chain = Self::build_chain(config, &repository);
        let mut coordinator = ExtractionCoordinator::new(
            repository.clone(),
            Arc::new(direct),
            Arc::new(render),
            settings,
        );
        if let Some(chain) = chain.as_ref() {
            coordinator = coordinator.with_chain(chain.clone(), config.ai.clone());
        }

        Ok(Self {
            config: config.clone(),
            repository,
            coordinator: Arc::new(coordinator),
            chain,
        })
    }

    fn build_chain(config: &Config, repository: &Arc<Repository>) -> Option<Arc<AiChain>> {
        if !config.ai.any_enabled() {
            return None;
        }
        let Some(key) = config.claude_api_key.as_ref() else {
            tracing::warn!("AI features enabled but no claude_api_key configured");
            return None;
        };

        let model: Arc<dyn LanguageModel> = Arc::new(ClaudeClient::new(key.clone()));
        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(CleaningStage::new(repository.clone(), model.clone())),
            Arc::new(SummaryStage::new(repository.clone(), model.clone())),
            Arc::new(TranslationStage::new(
                repository.clone(),
                model,
                config.target_language(),
            )),
        ];
        Some(Arc::new(AiChain::new(stages)))
    }

    /// Drains the extraction queue, then waits for the AI chain it triggered.
    pub async fn extract_all(&self) -> Result<DrainReport> {
        self.coordinator.notify_sync();
        let report = self.coordinator.drain().await?;
        if let Some(chain) = self.chain.as_ref() {
            chain.join().await;
        }
        Ok(report)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.coordinator.pending_count().await
    }

    /// Runs the extraction worker until Ctrl-C.
    pub async fn run_worker(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(self.coordinator.clone().run(cancel.clone()));

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down extraction worker");
        cancel.cancel();
        if let Some(chain) = self.chain.as_ref() {
            chain.cancel();
        }

        worker
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("extraction worker panicked: {}", e)))?
    }

    /// Priority 0 takes the article out of the extraction queue; higher values
    /// are extracted first.
    pub async fn set_priority(&self, article_id: i64, priority: i64) -> Result<()> {
        self.repository
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article {}", article_id)))?;
        self.repository.set_priority(article_id, priority).await
    }

    /// Speaks an article through espeak-ng, resuming where it was left, then
    /// carries on through the other readable articles.
    pub async fn speak(&self, article_id: i64, mode: PlaybackMode) -> Result<()> {
        let content = self
            .repository
            .resolve(article_id, mode)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("content for article {}", article_id)))?;

        let playlist = self.repository.readable_article_ids().await?;
        let index = playlist.iter().position(|id| *id == article_id).unwrap_or(0);

        let speech = &self.config.speech;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = EspeakEngine::spawn(speech.rate, events_tx);
        let controller = SpeechLoopController::new(
            Box::new(engine),
            self.repository.clone(),
            SentenceSegmenter::new(speech.max_utterance_chars),
            speech.default_language.clone(),
        );
        let (handle, task) = PlaybackService::spawn(controller, events_rx, self.repository.clone());

        handle
            .send(PlaybackRequest::Play(PlaybackCommand {
                playlist,
                index,
                mode,
                text: content.text,
                language: content
                    .language
                    .unwrap_or_else(|| speech.default_language.clone()),
                article_id,
                title: content.title,
                feed_title: None,
            }))
            .await?;

        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => Ok(()),
            result = handle.finished() => result,
        };

        handle.send(PlaybackRequest::Shutdown).await?;
        task.await
            .map_err(|e| AppError::Other(anyhow::anyhow!("playback task panicked: {}", e)))?;
        outcome
    }
}
