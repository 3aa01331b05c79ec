use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_test::{assert_pending, task};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use speedy_narrator::db::Repository;
use speedy_narrator::extraction::{
    DirectFetch, ExtractOutcome, ExtractionCoordinator, ExtractionSettings, FailureKind,
    FailureReason, FetchError, FetchStrategy, RetryDecision, StrategyKind,
};
use speedy_narrator::models::{NewArticle, NewFeed};

const ARTICLE_PAGE: &str = r#"<html><head><title>Harbour</title></head><body>
<nav><a href="/">Home</a></nav>
<article>
  <h1>Harbour reopens after storm</h1>
  <p>The harbour reopened on Monday morning after a week of repairs to the sea wall,
     which had been badly damaged by the storm that swept along the coast last month.</p>
  <p>Fishing boats returned to their moorings within hours, and the harbour master said
     traffic should be back to normal levels by the end of the week if the weather holds.</p>
</article>
<footer>Copyright</footer>
</body></html>"#;

const SCRIPT_SHELL: &str = r#"<html><body><div id="root">
<p>You need to enable JavaScript to run this app.</p>
</div><script src="/bundle.js"></script></body></html>"#;

/// Stands in for the headless browser: always returns the fully rendered page.
struct RenderedPage {
    calls: AtomicUsize,
    delay: Duration,
}

impl RenderedPage {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl FetchStrategy for RenderedPage {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SandboxedRender
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(45)
    }

    async fn fetch(&self, _url: &str, cancel: CancellationToken) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::new(FailureKind::Cancelled, "cancelled")),
            _ = tokio::time::sleep(self.delay) => Ok(ARTICLE_PAGE.to_string()),
        }
    }
}

struct Fixture {
    repository: Arc<Repository>,
    feed_id: i64,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("narrator.db");
    let repository = Arc::new(Repository::new(db_path.to_str().unwrap()).await.unwrap());
    let feed_id = repository
        .insert_feed(NewFeed {
            title: "Coast Gazette".to_string(),
            url: "https://gazette.example.com/rss".to_string(),
            language: Some("en".to_string()),
            authenticated: false,
            preload: true,
        })
        .await
        .unwrap();
    Fixture {
        repository,
        feed_id,
        _dir: dir,
    }
}

async fn add_article(fixture: &Fixture, url: String) -> i64 {
    fixture
        .repository
        .upsert_article(NewArticle {
            feed_id: fixture.feed_id,
            title: "Harbour reopens after storm".to_string(),
            url,
            published_at: None,
            raw_html: None,
            priority: 1,
        })
        .await
        .unwrap()
}

fn settings() -> ExtractionSettings {
    ExtractionSettings {
        direct_timeout_secs: 5,
        ..ExtractionSettings::default()
    }
}

fn coordinator(
    fixture: &Fixture,
    render: Arc<RenderedPage>,
) -> ExtractionCoordinator {
    let settings = settings();
    let direct = DirectFetch::new(&settings).unwrap();
    ExtractionCoordinator::new(
        fixture.repository.clone(),
        Arc::new(direct),
        render,
        &settings,
    )
}

#[tokio::test]
async fn direct_fetch_extracts_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/harbour"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_PAGE))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let id = add_article(&fixture, format!("{}/harbour", server.uri())).await;
    let render = RenderedPage::new(Duration::ZERO);
    let coordinator = coordinator(&fixture, render.clone());

    assert_eq!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Extracted {
            article_id: id,
            strategy: StrategyKind::Direct
        }
    );

    let article = fixture.repository.get_article(id).await.unwrap().unwrap();
    let text = article.content_text.unwrap();
    assert_eq!(text.split("--####--").count(), 2);
    assert!(text.starts_with("The harbour reopened"));
    assert!(!text.contains("Copyright"));
    assert!(article.cleaned_html.unwrap().contains("<p>"));
    assert_eq!(render.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.repository.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn script_shell_flips_feed_to_sandboxed_render() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCRIPT_SHELL))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let id = add_article(&fixture, format!("{}/app", server.uri())).await;
    let render = RenderedPage::new(Duration::ZERO);
    let coordinator = coordinator(&fixture, render.clone());

    let outcome = coordinator.extract_next().await.unwrap();
    assert!(matches!(
        outcome,
        ExtractOutcome::Failed {
            strategy: StrategyKind::Direct,
            reason: FailureReason::Content(_),
            decision: RetryDecision::Requeued { attempts: 1 },
            ..
        }
    ));
    let feed = fixture
        .repository
        .get_feed(fixture.feed_id)
        .await
        .unwrap()
        .unwrap();
    assert!(feed.requires_render);

    // The retry goes through the renderer and every later article of the feed does too.
    assert_eq!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Extracted {
            article_id: id,
            strategy: StrategyKind::SandboxedRender
        }
    );
    let second = add_article(&fixture, format!("{}/other", server.uri())).await;
    assert_eq!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Extracted {
            article_id: second,
            strategy: StrategyKind::SandboxedRender
        }
    );
    assert_eq!(render.calls.load(Ordering::SeqCst), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn rate_limit_hint_holds_back_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let id = add_article(&fixture, format!("{}/busy", server.uri())).await;
    let coordinator = coordinator(&fixture, RenderedPage::new(Duration::ZERO));

    match coordinator.extract_next().await.unwrap() {
        ExtractOutcome::Failed {
            article_id,
            reason: FailureReason::Fetch(error),
            ..
        } => {
            assert_eq!(article_id, id);
            assert_eq!(
                error.kind,
                FailureKind::RateLimited {
                    retry_after: Some(Duration::from_secs(120))
                }
            );
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let before = tokio::time::Instant::now();
    match coordinator.extract_next().await.unwrap() {
        ExtractOutcome::Waiting { until } => {
            assert!(until >= before + Duration::from_secs(100));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn huge_rate_limit_hint_does_not_stop_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forever"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "18446744073709551615"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/harbour"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_PAGE))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let stuck = add_article(&fixture, format!("{}/forever", server.uri())).await;
    let healthy = add_article(&fixture, format!("{}/harbour", server.uri())).await;
    let coordinator = coordinator(&fixture, RenderedPage::new(Duration::ZERO));

    assert!(matches!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Failed { article_id, .. } if article_id == stuck
    ));
    assert_eq!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Extracted {
            article_id: healthy,
            strategy: StrategyKind::Direct
        }
    );
    match coordinator.extract_next().await.unwrap() {
        ExtractOutcome::Waiting { until } => {
            let cap = Duration::from_secs(settings().max_retry_after_secs);
            assert!(until <= tokio::time::Instant::now() + cap);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn server_errors_use_up_the_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    add_article(&fixture, format!("{}/broken", server.uri())).await;
    let coordinator = coordinator(&fixture, RenderedPage::new(Duration::ZERO));

    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.extracted, 0);
    assert_eq!(report.failed, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    // Exhausted for this session; a re-sync grants a fresh budget.
    assert!(matches!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Drained { .. }
    ));
    coordinator.resync();
    assert!(matches!(
        coordinator.extract_next().await.unwrap(),
        ExtractOutcome::Failed {
            reason: FailureReason::Fetch(FetchError {
                kind: FailureKind::HttpStatus(500),
                ..
            }),
            decision: RetryDecision::Requeued { attempts: 1 },
            ..
        }
    ));
}

#[tokio::test]
async fn dropping_an_extraction_releases_the_slot() {
    let fixture = fixture().await;
    fixture
        .repository
        .mark_feed_requires_render(fixture.feed_id)
        .await
        .unwrap();
    add_article(&fixture, "https://gazette.example.com/slow".to_string()).await;
    let coordinator = coordinator(&fixture, RenderedPage::new(Duration::from_secs(30)));

    let mut first = task::spawn(coordinator.extract_next());
    assert_pending!(first.poll());
    assert!(coordinator.is_in_flight());
    assert_eq!(coordinator.extract_next().await.unwrap(), ExtractOutcome::Busy);

    drop(first);
    assert!(!coordinator.is_in_flight());
}

#[tokio::test]
async fn concurrent_callers_get_one_extraction() {
    let fixture = fixture().await;
    fixture
        .repository
        .mark_feed_requires_render(fixture.feed_id)
        .await
        .unwrap();
    for n in 0..3 {
        add_article(&fixture, format!("https://gazette.example.com/{}", n)).await;
    }
    let render = RenderedPage::new(Duration::from_millis(500));
    let coordinator = Arc::new(coordinator(&fixture, render.clone()));

    let outcomes = futures::future::join_all((0..8).map(|_| {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.extract_next().await.unwrap() })
    }))
    .await;

    let extracted = outcomes
        .into_iter()
        .map(Result::unwrap)
        .filter(|o| matches!(o, ExtractOutcome::Extracted { .. }))
        .count();
    assert_eq!(extracted, 1);
    assert_eq!(render.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.repository.pending_count().await.unwrap(), 2);
}
