use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::retry::{RetryDecision, RetryLedger};
use super::strategy::{FailureKind, FetchError, FetchStrategy, StrategyKind};
use super::ExtractionSettings;
use crate::ai::{AiStageKind, ChainTrigger};
use crate::config::AiFeatures;
use crate::content::{ContentError, ContentNormalizer, NormalizedContent};
use crate::error::{AppError, Result};
use crate::models::{Article, Feed};

const BUSY_BACKOFF: Duration = Duration::from_millis(250);

/// Store queries the coordinator depends on.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Highest-priority, oldest article with empty content and priority > 0,
    /// skipping `exclude`.
    async fn next_pending_article(&self, exclude: &[i64]) -> Result<Option<Article>>;

    async fn get_article(&self, article_id: i64) -> Result<Option<Article>>;

    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;

    async fn save_extracted_content(
        &self,
        article_id: i64,
        markup: String,
        text: String,
    ) -> Result<()>;

    async fn mark_feed_requires_render(&self, feed_id: i64) -> Result<()>;

    async fn pending_count(&self) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Fetch(FetchError),
    /// Page arrived but held no usable article text.
    Content(ContentError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Another extraction is in flight; nothing was done.
    Busy,
    Extracted {
        article_id: i64,
        strategy: StrategyKind,
    },
    Failed {
        article_id: i64,
        strategy: StrategyKind,
        reason: FailureReason,
        decision: RetryDecision,
    },
    AlreadyExtracted {
        article_id: i64,
    },
    /// Retry budget used up for this session; no fetch was attempted.
    Exhausted {
        article_id: i64,
    },
    /// Only rate-limited retries remain; the earliest is eligible at `until`.
    Waiting {
        until: Instant,
    },
    Drained {
        chain_triggered: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub extracted: usize,
    pub failed: usize,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the extraction queue one article at a time.
pub struct ExtractionCoordinator {
    store: Arc<dyn ArticleStore>,
    direct: Arc<dyn FetchStrategy>,
    render: Arc<dyn FetchStrategy>,
    normalizer: ContentNormalizer,
    retries: Mutex<RetryLedger>,
    in_flight: AtomicBool,
    completion_armed: AtomicBool,
    chain: Option<Arc<dyn ChainTrigger>>,
    features: AiFeatures,
    wake: Notify,
}

impl ExtractionCoordinator {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        direct: Arc<dyn FetchStrategy>,
        render: Arc<dyn FetchStrategy>,
        settings: &ExtractionSettings,
    ) -> Self {
        Self {
            store,
            direct,
            render,
            normalizer: ContentNormalizer::new(settings.min_content_chars),
            retries: Mutex::new(RetryLedger::new(
                settings.max_attempts,
                settings.max_retry_after(),
            )),
            in_flight: AtomicBool::new(false),
            completion_armed: AtomicBool::new(true),
            chain: None,
            features: AiFeatures::default(),
            wake: Notify::new(),
        }
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainTrigger>, features: AiFeatures) -> Self {
        self.chain = Some(chain);
        self.features = features;
        self
    }

    fn ledger(&self) -> MutexGuard<'_, RetryLedger> {
        // The ledger holds plain counters; a panic elsewhere cannot leave it half-updated.
        self.retries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.store.pending_count().await
    }

    /// New articles arrived: re-arm the completion trigger and wake the worker.
    pub fn notify_sync(&self) {
        self.completion_armed.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Explicit re-sync: forget this session's failures so every article gets a
    /// fresh retry budget.
    pub fn resync(&self) {
        self.ledger().clear();
        self.notify_sync();
    }

    pub async fn extract_next(&self) -> Result<ExtractOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(ExtractOutcome::Busy);
        };

        loop {
            let exclude = self.ledger().failed_ids();
            if let Some(article) = self.store.next_pending_article(&exclude).await? {
                return self.attempt(article).await;
            }

            let retry = self.ledger().next_ready(Instant::now());
            if let Some(article_id) = retry {
                match self.store.get_article(article_id).await? {
                    Some(article) if !article.has_content() => {
                        return self.attempt(article).await;
                    }
                    _ => {
                        self.ledger().forget(article_id);
                        continue;
                    }
                }
            }

            let wake_at = self.ledger().next_wake();
            if let Some(until) = wake_at {
                return Ok(ExtractOutcome::Waiting { until });
            }

            let chain_triggered = self.complete();
            return Ok(ExtractOutcome::Drained { chain_triggered });
        }
    }

    /// Extract one specific article now, outside queue order.
    pub async fn extract_article(&self, article_id: i64) -> Result<ExtractOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(ExtractOutcome::Busy);
        };

        if self.ledger().is_exhausted(article_id) {
            tracing::debug!("Article {} exhausted its retries, not fetching", article_id);
            return Ok(ExtractOutcome::Exhausted { article_id });
        }

        let article = self
            .store
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article {}", article_id)))?;

        if article.has_content() {
            return Ok(ExtractOutcome::AlreadyExtracted { article_id });
        }
        self.attempt(article).await
    }

    fn strategy_for(&self, feed: Option<&Feed>) -> Arc<dyn FetchStrategy> {
        if feed.is_some_and(Feed::needs_sandboxed_render) {
            Arc::clone(&self.render)
        } else {
            Arc::clone(&self.direct)
        }
    }

    async fn attempt(&self, article: Article) -> Result<ExtractOutcome> {
        let feed = self.store.get_feed(article.feed_id).await?;
        let strategy = self.strategy_for(feed.as_ref());
        let kind = strategy.kind();
        tracing::debug!("Extracting article {} via {}: {}", article.id, kind, article.url);

        let html = match self.fetch_guarded(strategy, &article.url).await {
            Ok(html) => html,
            Err(error) => {
                let decision = self.ledger().record_failure(article.id, error.retry_after());
                tracing::warn!(
                    "Fetching article {} via {} failed ({:?}): {}",
                    article.id,
                    kind,
                    decision,
                    error
                );
                return Ok(ExtractOutcome::Failed {
                    article_id: article.id,
                    strategy: kind,
                    reason: FailureReason::Fetch(error),
                    decision,
                });
            }
        };

        match self.normalize(html).await? {
            Ok(content) => {
                self.store
                    .save_extracted_content(article.id, content.markup, content.text)
                    .await?;
                self.ledger().record_success(article.id);
                tracing::info!("Extracted article {} via {}", article.id, kind);
                Ok(ExtractOutcome::Extracted {
                    article_id: article.id,
                    strategy: kind,
                })
            }
            Err(error) => {
                if kind == StrategyKind::Direct {
                    if let Some(feed) = feed.as_ref().filter(|f| !f.requires_render) {
                        tracing::info!(
                            "Feed {} needs sandboxed rendering ({})",
                            feed.id,
                            error
                        );
                        self.store.mark_feed_requires_render(feed.id).await?;
                    }
                }
                let decision = self.ledger().record_failure(article.id, None);
                tracing::warn!(
                    "Article {} yielded unusable content via {} ({:?}): {}",
                    article.id,
                    kind,
                    decision,
                    error
                );
                Ok(ExtractOutcome::Failed {
                    article_id: article.id,
                    strategy: kind,
                    reason: FailureReason::Content(error),
                    decision,
                })
            }
        }
    }

    /// Runs the fetch on its own task, bounded by the strategy's watchdog. When
    /// the watchdog fires the attempt is cancelled and counts as failed even if
    /// the fetch finishes a moment later.
    async fn fetch_guarded(
        &self,
        strategy: Arc<dyn FetchStrategy>,
        url: &str,
    ) -> std::result::Result<String, FetchError> {
        let timeout = strategy.timeout();
        let cancel = CancellationToken::new();
        // Abandoning this future must not leave the fetch running.
        let _abandon = cancel.clone().drop_guard();
        let task_cancel = cancel.clone();
        let url = url.to_string();
        let mut handle = tokio::spawn(async move { strategy.fetch(&url, task_cancel).await });

        tokio::select! {
            joined = &mut handle => joined.unwrap_or_else(|e| {
                Err(FetchError::new(FailureKind::Network, format!("fetch task failed: {}", e)))
            }),
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                handle.abort();
                tracing::warn!("Extraction watchdog fired after {}s", timeout.as_secs());
                Err(FetchError::timeout(timeout))
            }
        }
    }

    async fn normalize(
        &self,
        html: String,
    ) -> Result<std::result::Result<NormalizedContent, ContentError>> {
        let normalizer = self.normalizer.clone();
        tokio::task::spawn_blocking(move || normalizer.normalize(&html))
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("normalizer task failed: {}", e)))
    }

    /// Fires the AI chain once per sync, when enabled.
    fn complete(&self) -> bool {
        if !self.completion_armed.swap(false, Ordering::AcqRel) {
            return false;
        }
        let Some(chain) = self.chain.as_ref() else {
            return false;
        };
        let stages = AiStageKind::enabled(&self.features);
        if stages.is_empty() {
            tracing::debug!("Extraction queue drained; no AI stages enabled");
            return false;
        }
        tracing::info!("Extraction queue drained; starting AI chain {:?}", stages);
        chain.submit(stages);
        true
    }

    /// Extracts until nothing is left, waiting out rate-limit hints.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        loop {
            match self.extract_next().await? {
                ExtractOutcome::Extracted { .. } => report.extracted += 1,
                ExtractOutcome::Failed { .. } => report.failed += 1,
                ExtractOutcome::Waiting { until } => tokio::time::sleep_until(until).await,
                ExtractOutcome::Busy => tokio::time::sleep(BUSY_BACKOFF).await,
                ExtractOutcome::Drained { .. } => return Ok(report),
                ExtractOutcome::AlreadyExtracted { .. } | ExtractOutcome::Exhausted { .. } => {}
            }
        }
    }

    /// Background worker loop. Returns when cancelled or when the store fails.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() {
            match self.extract_next().await? {
                ExtractOutcome::Busy => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(BUSY_BACKOFF) => {}
                    }
                }
                ExtractOutcome::Waiting { until } => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep_until(until) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                ExtractOutcome::Drained { .. } => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
                _ => {}
            }
        }
        tracing::debug!("Extraction worker stopped");
        Ok(())
    }
}
