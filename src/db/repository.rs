use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::ai::AiStore;
use crate::error::Result;
use crate::extraction::ArticleStore;
use crate::models::{Article, Feed, NewArticle, NewFeed, PlaybackMode};
use crate::speech::{ContentResolver, ResolvedContent, ResumeStore};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "a.id, a.feed_id, a.title, a.url, a.published_at, a.raw_html, \
     a.cleaned_html, a.content_text, a.summary, a.translated_title, a.translated_summary, \
     a.translated_text, a.resume_position, a.priority, a.target_language, a.ai_cleaned, \
     a.ai_summarized, a.created_at";

const FEED_COLUMNS: &str =
    "id, title, url, language, requires_render, authenticated, preload, created_at";

const HAS_CONTENT: &str = "(a.content_text IS NOT NULL AND trim(a.content_text) != '')";

const IS_PENDING: &str =
    "(a.content_text IS NULL OR trim(a.content_text) = '') AND a.priority > 0";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    pub async fn insert_feed(&self, feed: NewFeed) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feeds (title, url, language, authenticated, preload) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![feed.title, feed.url, feed.language, feed.authenticated, feed.preload],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {} FROM feeds WHERE id = ?1", FEED_COLUMNS),
                        params![id],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM feeds ORDER BY title", FEED_COLUMNS))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    /// Sticky: once a feed needs rendering it never goes back to direct fetches.
    pub async fn mark_feed_requires_render(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET requires_render = 1 WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Article operations

    /// Inserts a synced article or refreshes its metadata. Extracted content,
    /// AI output and the resume position survive a re-sync.
    pub async fn upsert_article(&self, article: NewArticle) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    r#"INSERT INTO articles (feed_id, title, url, published_at, raw_html, priority)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(feed_id, url) DO UPDATE SET
                           title = excluded.title,
                           published_at = excluded.published_at,
                           raw_html = COALESCE(excluded.raw_html, articles.raw_html),
                           priority = excluded.priority
                       RETURNING id"#,
                    params![
                        article.feed_id,
                        article.title,
                        article.url,
                        article.published_at.map(|dt| dt.to_rfc3339()),
                        article.raw_html,
                        article.priority,
                    ],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("SELECT {} FROM articles a WHERE a.id = ?1", ARTICLE_COLUMNS),
                        params![id],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Ids of articles with speakable content, newest first.
    pub async fn readable_article_ids(&self) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT a.id FROM articles a WHERE {} ORDER BY a.published_at DESC NULLS LAST, a.created_at DESC",
                    HAS_CONTENT
                ))?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn next_pending_article(&self, exclude: Vec<i64>) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut sql = format!(
                    "SELECT {} FROM articles a WHERE {}",
                    ARTICLE_COLUMNS, IS_PENDING
                );
                if !exclude.is_empty() {
                    let placeholders = vec!["?"; exclude.len()].join(", ");
                    sql.push_str(&format!(" AND a.id NOT IN ({})", placeholders));
                }
                sql.push_str(" ORDER BY a.priority DESC, a.created_at ASC, a.id ASC LIMIT 1");

                let article = conn
                    .query_row(&sql, params_from_iter(exclude.iter()), article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM articles a WHERE {}", IS_PENDING),
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn save_extracted_content(&self, id: i64, markup: String, text: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET cleaned_html = ?1, content_text = ?2 WHERE id = ?3",
                    params![markup, text, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_priority(&self, id: i64, priority: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET priority = ?1 WHERE id = ?2",
                    params![priority, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn resume_position(&self, id: i64) -> Result<Option<usize>> {
        let position = self
            .conn
            .call(move |conn| {
                let position: Option<i64> = conn
                    .query_row(
                        "SELECT resume_position FROM articles WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(position)
            })
            .await?;
        Ok(position.map(|p| usize::try_from(p).unwrap_or_default()))
    }

    pub async fn save_resume_position(&self, id: i64, position: usize) -> Result<()> {
        let position = i64::try_from(position).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET resume_position = ?1 WHERE id = ?2",
                    params![position, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // AI stage operations

    async fn articles_where(&self, condition: &'static str, limit: usize) -> Result<Vec<Article>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles a WHERE {} AND {} ORDER BY a.priority DESC, a.id LIMIT ?1",
                    ARTICLE_COLUMNS, HAS_CONTENT, condition
                ))?;
                let articles = stmt
                    .query_map(params![limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn save_cleaned_text(&self, id: i64, text: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET content_text = ?1, ai_cleaned = 1 WHERE id = ?2",
                    params![text, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn save_summary(&self, id: i64, summary: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET summary = ?1, ai_summarized = 1 WHERE id = ?2",
                    params![summary, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        language: row.get(3)?,
        requires_render: row.get(4)?,
        authenticated: row.get(5)?,
        preload: row.get(6)?,
        created_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        published_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| parse_datetime(&s)),
        raw_html: row.get(5)?,
        cleaned_html: row.get(6)?,
        content_text: row.get(7)?,
        summary: row.get(8)?,
        translated_title: row.get(9)?,
        translated_summary: row.get(10)?,
        translated_text: row.get(11)?,
        resume_position: usize::try_from(row.get::<_, i64>(12)?).unwrap_or_default(),
        priority: row.get(13)?,
        target_language: row.get(14)?,
        ai_cleaned: row.get(15)?,
        ai_summarized: row.get(16)?,
        created_at: row
            .get::<_, String>(17)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

#[async_trait]
impl ArticleStore for Repository {
    async fn next_pending_article(&self, exclude: &[i64]) -> Result<Option<Article>> {
        Repository::next_pending_article(self, exclude.to_vec()).await
    }

    async fn get_article(&self, article_id: i64) -> Result<Option<Article>> {
        Repository::get_article(self, article_id).await
    }

    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        Repository::get_feed(self, feed_id).await
    }

    async fn save_extracted_content(
        &self,
        article_id: i64,
        markup: String,
        text: String,
    ) -> Result<()> {
        Repository::save_extracted_content(self, article_id, markup, text).await
    }

    async fn mark_feed_requires_render(&self, feed_id: i64) -> Result<()> {
        Repository::mark_feed_requires_render(self, feed_id).await
    }

    async fn pending_count(&self) -> Result<usize> {
        Repository::pending_count(self).await
    }
}

#[async_trait]
impl ResumeStore for Repository {
    async fn resume_position(&self, article_id: i64) -> Result<Option<usize>> {
        Repository::resume_position(self, article_id).await
    }

    async fn save_resume_position(&self, article_id: i64, position: usize) -> Result<()> {
        Repository::save_resume_position(self, article_id, position).await
    }
}

#[async_trait]
impl AiStore for Repository {
    async fn articles_to_clean(&self, limit: usize) -> Result<Vec<Article>> {
        self.articles_where("a.ai_cleaned = 0", limit).await
    }

    async fn articles_to_summarize(&self, limit: usize) -> Result<Vec<Article>> {
        self.articles_where("a.ai_summarized = 0", limit).await
    }

    async fn articles_to_translate(
        &self,
        default_target: &str,
        limit: usize,
    ) -> Result<Vec<(Article, String)>> {
        let default_target = default_target.to_lowercase();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {}, lower(COALESCE(a.target_language, ?1)) AS target
                       FROM articles a
                       JOIN feeds f ON a.feed_id = f.id
                       WHERE {} AND a.translated_text IS NULL
                         AND f.language IS NOT NULL
                         AND lower(f.language) != lower(COALESCE(a.target_language, ?1))
                       ORDER BY a.priority DESC, a.id
                       LIMIT ?2"#,
                    ARTICLE_COLUMNS, HAS_CONTENT
                ))?;
                let rows = stmt
                    .query_map(params![default_target, limit], |row| {
                        Ok((article_from_row(row)?, row.get::<_, String>(18)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn save_cleaned_text(&self, article_id: i64, text: String) -> Result<()> {
        Repository::save_cleaned_text(self, article_id, text).await
    }

    async fn save_summary(&self, article_id: i64, summary: String) -> Result<()> {
        Repository::save_summary(self, article_id, summary).await
    }

    async fn save_translation(
        &self,
        article_id: i64,
        target: String,
        title: String,
        summary: Option<String>,
        text: String,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE articles SET target_language = ?1, translated_title = ?2,
                           translated_summary = ?3, translated_text = ?4
                       WHERE id = ?5"#,
                    params![target, title, summary, text, article_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentResolver for Repository {
    async fn resolve(
        &self,
        article_id: i64,
        mode: PlaybackMode,
    ) -> Result<Option<ResolvedContent>> {
        let Some(article) = Repository::get_article(self, article_id).await? else {
            return Ok(None);
        };
        let Some(full_text) = non_empty(article.content_text.as_deref()) else {
            return Ok(None);
        };
        let feed_language = Repository::get_feed(self, article.feed_id)
            .await?
            .and_then(|feed| feed.language);

        let resolved = match mode {
            PlaybackMode::Translated => match non_empty(article.translated_text.as_deref()) {
                Some(text) => ResolvedContent {
                    text: text.to_string(),
                    language: article.target_language.clone(),
                    title: article
                        .translated_title
                        .clone()
                        .unwrap_or_else(|| article.title.clone()),
                },
                None => ResolvedContent {
                    text: full_text.to_string(),
                    language: feed_language,
                    title: article.title.clone(),
                },
            },
            PlaybackMode::Summary => ResolvedContent {
                text: non_empty(article.summary.as_deref())
                    .unwrap_or(full_text)
                    .to_string(),
                language: feed_language,
                title: article.title.clone(),
            },
            PlaybackMode::Full => ResolvedContent {
                text: full_text.to_string(),
                language: feed_language,
                title: article.title.clone(),
            },
        };
        Ok(Some(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn repository() -> (Repository, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (repo, dir)
    }

    async fn seed_feed(repo: &Repository, language: Option<&str>) -> i64 {
        repo.insert_feed(NewFeed {
            title: "Local News".to_string(),
            url: "https://news.example.com/rss".to_string(),
            language: language.map(str::to_string),
            authenticated: false,
            preload: true,
        })
        .await
        .unwrap()
    }

    async fn seed_article(repo: &Repository, feed_id: i64, slug: &str, priority: i64) -> i64 {
        repo.upsert_article(NewArticle {
            feed_id,
            title: format!("Story {}", slug),
            url: format!("https://news.example.com/{}", slug),
            published_at: None,
            raw_html: None,
            priority,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn pending_queue_orders_by_priority_and_skips_excluded() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, Some("en")).await;
        let low = seed_article(&repo, feed, "low", 1).await;
        let high = seed_article(&repo, feed, "high", 5).await;
        let _never = seed_article(&repo, feed, "never", 0).await;

        assert_eq!(repo.pending_count().await.unwrap(), 2);
        let next = repo.next_pending_article(Vec::new()).await.unwrap().unwrap();
        assert_eq!(next.id, high);
        let next = repo.next_pending_article(vec![high]).await.unwrap().unwrap();
        assert_eq!(next.id, low);
        assert!(repo
            .next_pending_article(vec![high, low])
            .await
            .unwrap()
            .is_none());

        repo.save_extracted_content(high, "<p>x</p>".to_string(), "Text.--####--More.".to_string())
            .await
            .unwrap();
        assert_eq!(repo.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn priority_changes_reorder_and_dequeue() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, Some("en")).await;
        let first = seed_article(&repo, feed, "first", 1).await;
        let second = seed_article(&repo, feed, "second", 1).await;

        repo.set_priority(second, 9).await.unwrap();
        let next = repo.next_pending_article(Vec::new()).await.unwrap().unwrap();
        assert_eq!(next.id, second);

        repo.set_priority(first, 0).await.unwrap();
        assert_eq!(repo.pending_count().await.unwrap(), 1);
        assert!(repo
            .next_pending_article(vec![second])
            .await
            .unwrap()
            .is_none());
        assert!(repo.readable_article_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resync_keeps_extracted_content_and_position() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, Some("en")).await;
        let id = seed_article(&repo, feed, "story", 1).await;
        repo.save_extracted_content(id, String::new(), "One.--####--Two.".to_string())
            .await
            .unwrap();
        repo.save_resume_position(id, 1).await.unwrap();

        let again = seed_article(&repo, feed, "story", 2).await;
        assert_eq!(again, id);
        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.content_text.as_deref(), Some("One.--####--Two."));
        assert_eq!(article.resume_position, 1);
        assert_eq!(article.priority, 2);
        assert_eq!(repo.resume_position(id).await.unwrap(), Some(1));
        assert_eq!(repo.resume_position(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn render_flag_is_persisted() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, None).await;
        assert!(!repo.get_feed(feed).await.unwrap().unwrap().requires_render);

        repo.mark_feed_requires_render(feed).await.unwrap();
        let stored = repo.get_feed(feed).await.unwrap().unwrap();
        assert!(stored.requires_render);
        assert!(stored.needs_sandboxed_render());
    }

    #[tokio::test]
    async fn translation_candidates_depend_on_feed_language() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, Some("de")).await;
        let id = seed_article(&repo, feed, "bericht", 1).await;

        // No content yet.
        assert!(repo.articles_to_translate("en", 10).await.unwrap().is_empty());

        repo.save_extracted_content(id, String::new(), "Eins.--####--Zwei.".to_string())
            .await
            .unwrap();
        let candidates = repo.articles_to_translate("EN", 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1, "en");
        assert!(repo.articles_to_translate("de", 10).await.unwrap().is_empty());

        repo.save_translation(
            id,
            "en".to_string(),
            "Report".to_string(),
            None,
            "One.--####--Two.".to_string(),
        )
        .await
        .unwrap();
        assert!(repo.articles_to_translate("en", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolver_falls_back_to_full_text() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, Some("de")).await;
        let id = seed_article(&repo, feed, "bericht", 1).await;
        assert!(repo.resolve(id, PlaybackMode::Full).await.unwrap().is_none());

        repo.save_extracted_content(id, String::new(), "Eins.--####--Zwei.".to_string())
            .await
            .unwrap();
        let summary = repo.resolve(id, PlaybackMode::Summary).await.unwrap().unwrap();
        assert_eq!(summary.text, "Eins.--####--Zwei.");
        assert_eq!(summary.language.as_deref(), Some("de"));

        repo.save_summary(id, "Kurz.--####--Knapp.".to_string()).await.unwrap();
        let summary = repo.resolve(id, PlaybackMode::Summary).await.unwrap().unwrap();
        assert_eq!(summary.text, "Kurz.--####--Knapp.");

        repo.save_translation(
            id,
            "en".to_string(),
            "Report".to_string(),
            Some("Short.".to_string()),
            "One.--####--Two.".to_string(),
        )
        .await
        .unwrap();
        let translated = repo.resolve(id, PlaybackMode::Translated).await.unwrap().unwrap();
        assert_eq!(translated.text, "One.--####--Two.");
        assert_eq!(translated.language.as_deref(), Some("en"));
        assert_eq!(translated.title, "Report");
    }

    #[tokio::test]
    async fn ai_flags_drain_work_lists() {
        let (repo, _dir) = repository().await;
        let feed = seed_feed(&repo, Some("en")).await;
        let id = seed_article(&repo, feed, "story", 1).await;
        repo.save_extracted_content(id, String::new(), "A.--####--B.".to_string())
            .await
            .unwrap();

        assert_eq!(repo.articles_to_clean(10).await.unwrap().len(), 1);
        repo.save_cleaned_text(id, "A.".to_string()).await.unwrap();
        assert!(repo.articles_to_clean(10).await.unwrap().is_empty());

        assert_eq!(repo.articles_to_summarize(10).await.unwrap().len(), 1);
        AiStore::save_summary(&repo, id, "Sum.".to_string()).await.unwrap();
        assert!(repo.articles_to_summarize(10).await.unwrap().is_empty());
        assert_eq!(repo.readable_article_ids().await.unwrap(), vec![id]);
    }
}
