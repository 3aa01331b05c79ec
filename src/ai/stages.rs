use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::chain::{AiStageKind, PipelineStage, StageReport};
use super::client::LanguageModel;
use crate::content::PARAGRAPH_DELIMITER;
use crate::error::Result;
use crate::models::Article;

const BATCH_SIZE: usize = 20;

/// Work an AI stage needs from the store.
#[async_trait]
pub trait AiStore: Send + Sync {
    async fn articles_to_clean(&self, limit: usize) -> Result<Vec<Article>>;

    async fn articles_to_summarize(&self, limit: usize) -> Result<Vec<Article>>;

    /// Articles whose feed language differs from their target language, paired
    /// with that target.
    async fn articles_to_translate(
        &self,
        default_target: &str,
        limit: usize,
    ) -> Result<Vec<(Article, String)>>;

    async fn save_cleaned_text(&self, article_id: i64, text: String) -> Result<()>;

    async fn save_summary(&self, article_id: i64, summary: String) -> Result<()>;

    async fn save_translation(
        &self,
        article_id: i64,
        target: String,
        title: String,
        summary: Option<String>,
        text: String,
    ) -> Result<()>;
}

const CLEANING_PROMPT: &str = r#"You clean up article text extracted from web pages for text-to-speech.
The input paragraphs are separated by the marker --####--.
Remove paragraphs that are not part of the article itself: advertisements, newsletter prompts,
share buttons, photo credits, cookie notices and navigation leftovers.
Do not rewrite or reorder the remaining paragraphs.
Return only the remaining paragraphs, separated by --####--."#;

const SUMMARY_PROMPT: &str = r#"You are a helpful assistant that summarizes news articles.
Provide a concise, informative summary in 2-3 paragraphs.
Focus on the key facts, main arguments, and important conclusions.
Use clear, accessible language suitable for being read aloud.
Separate paragraphs with a blank line."#;

fn translation_prompt(target: &str) -> String {
    format!(
        "Translate the user's text into the language with code \"{}\".\n\
         Keep every --####-- marker exactly where it is.\n\
         Return only the translation.",
        target
    )
}

/// Model output uses blank lines between paragraphs; speech wants the delimiter.
fn paragraphs_to_stream(text: &str) -> String {
    text.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_DELIMITER)
}

fn paragraph_count(text: &str) -> usize {
    text.split(PARAGRAPH_DELIMITER)
        .filter(|p| !p.trim().is_empty())
        .count()
}

pub struct CleaningStage {
    store: Arc<dyn AiStore>,
    model: Arc<dyn LanguageModel>,
}

impl CleaningStage {
    pub fn new(store: Arc<dyn AiStore>, model: Arc<dyn LanguageModel>) -> Self {
        Self { store, model }
    }

    async fn clean(&self, article: &Article) -> Result<()> {
        let original = article.content_text.clone().unwrap_or_default();
        let cleaned = self.model.complete(CLEANING_PROMPT, &original).await?;
        let cleaned = cleaned.trim();

        // A model that throws away most of the article did not clean it.
        let text = if paragraph_count(cleaned) * 2 >= paragraph_count(&original)
            && paragraph_count(cleaned) >= 2
        {
            cleaned.to_string()
        } else {
            tracing::warn!(
                "Discarding cleaning result for article {}: too few paragraphs kept",
                article.id
            );
            original
        };
        self.store.save_cleaned_text(article.id, text).await
    }
}

#[async_trait]
impl PipelineStage for CleaningStage {
    fn kind(&self) -> AiStageKind {
        AiStageKind::Cleaning
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<StageReport> {
        let mut report = StageReport::default();
        loop {
            let batch = self.store.articles_to_clean(BATCH_SIZE).await?;
            if batch.is_empty() {
                return Ok(report);
            }
            for article in batch {
                if cancel.is_cancelled() {
                    return Ok(report);
                }
                match self.clean(&article).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        tracing::warn!("Cleaning article {} failed: {}", article.id, e);
                        report.failed += 1;
                        // Mark as cleaned anyway so one bad article cannot loop forever.
                        let original = article.content_text.clone().unwrap_or_default();
                        self.store.save_cleaned_text(article.id, original).await?;
                    }
                }
            }
        }
    }
}

pub struct SummaryStage {
    store: Arc<dyn AiStore>,
    model: Arc<dyn LanguageModel>,
}

impl SummaryStage {
    pub fn new(store: Arc<dyn AiStore>, model: Arc<dyn LanguageModel>) -> Self {
        Self { store, model }
    }

    async fn summarize(&self, article: &Article) -> Result<()> {
        let content = article
            .content_text
            .as_deref()
            .unwrap_or_default()
            .replace(PARAGRAPH_DELIMITER, "\n\n");
        let user_message = format!(
            "Please summarize the following article:\n\nTitle: {}\n\nContent:\n{}",
            article.title, content
        );
        let summary = self.model.complete(SUMMARY_PROMPT, &user_message).await?;
        self.store
            .save_summary(article.id, paragraphs_to_stream(&summary))
            .await
    }
}

#[async_trait]
impl PipelineStage for SummaryStage {
    fn kind(&self) -> AiStageKind {
        AiStageKind::Summarization
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<StageReport> {
        let mut report = StageReport::default();
        let mut skipped = Vec::new();
        loop {
            let batch: Vec<Article> = self
                .store
                .articles_to_summarize(BATCH_SIZE + skipped.len())
                .await?
                .into_iter()
                .filter(|a| !skipped.contains(&a.id))
                .collect();
            if batch.is_empty() {
                return Ok(report);
            }
            for article in batch {
                if cancel.is_cancelled() {
                    return Ok(report);
                }
                match self.summarize(&article).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        tracing::warn!("Summarizing article {} failed: {}", article.id, e);
                        report.failed += 1;
                        skipped.push(article.id);
                    }
                }
            }
        }
    }
}

pub struct TranslationStage {
    store: Arc<dyn AiStore>,
    model: Arc<dyn LanguageModel>,
    default_target: String,
}

impl TranslationStage {
    pub fn new(
        store: Arc<dyn AiStore>,
        model: Arc<dyn LanguageModel>,
        default_target: impl Into<String>,
    ) -> Self {
        Self {
            store,
            model,
            default_target: default_target.into(),
        }
    }

    async fn translate(&self, article: &Article, target: &str) -> Result<()> {
        let prompt = translation_prompt(target);
        let title = self.model.complete(&prompt, &article.title).await?;
        let text = self
            .model
            .complete(&prompt, article.content_text.as_deref().unwrap_or_default())
            .await?;
        let summary = match article.summary.as_deref() {
            Some(summary) if !summary.trim().is_empty() => {
                Some(self.model.complete(&prompt, summary).await?)
            }
            _ => None,
        };
        self.store
            .save_translation(
                article.id,
                target.to_string(),
                title.trim().to_string(),
                summary.map(|s| s.trim().to_string()),
                text.trim().to_string(),
            )
            .await
    }
}

#[async_trait]
impl PipelineStage for TranslationStage {
    fn kind(&self) -> AiStageKind {
        AiStageKind::Translation
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<StageReport> {
        let mut report = StageReport::default();
        let mut skipped = Vec::new();
        loop {
            let batch: Vec<(Article, String)> = self
                .store
                .articles_to_translate(&self.default_target, BATCH_SIZE + skipped.len())
                .await?
                .into_iter()
                .filter(|(a, _)| !skipped.contains(&a.id))
                .collect();
            if batch.is_empty() {
                return Ok(report);
            }
            for (article, target) in batch {
                if cancel.is_cancelled() {
                    return Ok(report);
                }
                match self.translate(&article, &target).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        tracing::warn!("Translating article {} failed: {}", article.id, e);
                        report.failed += 1;
                        skipped.push(article.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::error::AppError;

    fn article(id: i64, text: &str) -> Article {
        Article {
            id,
            feed_id: 1,
            title: format!("Title {}", id),
            url: format!("https://example.com/{}", id),
            published_at: None,
            raw_html: None,
            cleaned_html: None,
            content_text: Some(text.to_string()),
            summary: None,
            translated_title: None,
            translated_summary: None,
            translated_text: None,
            resume_position: 0,
            priority: 1,
            target_language: None,
            ai_cleaned: false,
            ai_summarized: false,
            created_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        articles: Mutex<Vec<Article>>,
        cleaned: Mutex<Vec<(i64, String)>>,
        translated: Mutex<Vec<(i64, String, String)>>,
    }

    #[async_trait]
    impl AiStore for MemoryStore {
        async fn articles_to_clean(&self, limit: usize) -> Result<Vec<Article>> {
            let cleaned = self.cleaned.lock().unwrap();
            Ok(self
                .articles
                .lock()
                .unwrap()
                .iter()
                .filter(|a| !cleaned.iter().any(|(id, _)| *id == a.id))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn articles_to_summarize(&self, _limit: usize) -> Result<Vec<Article>> {
            Ok(Vec::new())
        }

        async fn articles_to_translate(
            &self,
            default_target: &str,
            limit: usize,
        ) -> Result<Vec<(Article, String)>> {
            let translated = self.translated.lock().unwrap();
            Ok(self
                .articles
                .lock()
                .unwrap()
                .iter()
                .filter(|a| !translated.iter().any(|(id, _, _)| *id == a.id))
                .take(limit)
                .map(|a| (a.clone(), default_target.to_string()))
                .collect())
        }

        async fn save_cleaned_text(&self, article_id: i64, text: String) -> Result<()> {
            self.cleaned.lock().unwrap().push((article_id, text));
            Ok(())
        }

        async fn save_summary(&self, _article_id: i64, _summary: String) -> Result<()> {
            Ok(())
        }

        async fn save_translation(
            &self,
            article_id: i64,
            target: String,
            _title: String,
            _summary: Option<String>,
            text: String,
        ) -> Result<()> {
            self.translated.lock().unwrap().push((article_id, target, text));
            Ok(())
        }
    }

    /// Answers with a fixed reply, or fails for inputs containing "poison".
    struct CannedModel(&'static str);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            if user.contains("poison") {
                return Err(AppError::LanguageModel("refused".to_string()));
            }
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn over_aggressive_cleaning_keeps_original() {
        let store = Arc::new(MemoryStore::default());
        let original = "One.--####--Two.--####--Three.--####--Four.--####--Five.";
        store.articles.lock().unwrap().push(article(1, original));
        let stage = CleaningStage::new(store.clone(), Arc::new(CannedModel("One.")));

        let report = stage.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, StageReport { processed: 1, failed: 0 });
        assert_eq!(*store.cleaned.lock().unwrap(), vec![(1, original.to_string())]);
    }

    #[tokio::test]
    async fn one_failing_translation_does_not_stop_the_stage() {
        let store = Arc::new(MemoryStore::default());
        store
            .articles
            .lock()
            .unwrap()
            .extend([article(1, "poison pill"), article(2, "Hallo.--####--Welt.")]);
        let stage = TranslationStage::new(
            store.clone(),
            Arc::new(CannedModel("Hello.--####--World.")),
            "en",
        );

        let report = stage.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, StageReport { processed: 1, failed: 1 });
        assert_eq!(
            *store.translated.lock().unwrap(),
            vec![(2, "en".to_string(), "Hello.--####--World.".to_string())]
        );
    }

    #[test]
    fn model_paragraphs_become_delimited_stream() {
        let text = "First paragraph\nwraps here.\n\n\n\nSecond one.\n";
        assert_eq!(
            paragraphs_to_stream(text),
            "First paragraph wraps here.--####--Second one."
        );
    }

    #[test]
    fn paragraph_count_ignores_blank_segments() {
        assert_eq!(paragraph_count("a--####-- --####--b"), 2);
        assert_eq!(paragraph_count(""), 0);
    }
}
