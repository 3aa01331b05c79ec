use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::strategy::{FailureKind, FetchError, FetchStrategy, StrategyKind};
use super::ExtractionSettings;

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A headless page renderer. Not thread-safe; only the [`RenderHost`] task
/// touches an instance.
#[async_trait]
pub trait PageRenderer: Send {
    async fn load(&mut self, url: &str) -> Result<(), FetchError>;

    /// Whether the page has finished loading its initial document and scripts.
    async fn is_settled(&mut self) -> Result<bool, FetchError>;

    async fn rendered_html(&mut self) -> Result<String, FetchError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PageRenderer>, FetchError>;
}

/// Factory used when no rendering backend is configured.
pub struct UnconfiguredRenderer;

#[async_trait]
impl RendererFactory for UnconfiguredRenderer {
    async fn create(&self) -> Result<Box<dyn PageRenderer>, FetchError> {
        Err(FetchError::new(
            FailureKind::RendererUnavailable,
            "no webdriver_url configured",
        ))
    }
}

struct RenderRequest {
    url: String,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<String, FetchError>>,
}

/// Handle to the task that owns the single shared renderer. Loads are
/// processed strictly one at a time in arrival order.
#[derive(Clone)]
pub struct RenderHost {
    tx: mpsc::Sender<RenderRequest>,
}

impl RenderHost {
    pub fn spawn(factory: Arc<dyn RendererFactory>, settings: &ExtractionSettings) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let host = HostLoop {
            factory,
            renderer: None,
            loads_since_recycle: 0,
            recycle_after: settings.renderer_recycle_after.max(1),
            cooldown: settings.renderer_cooldown(),
            settle: settings.render_settle(),
        };
        tokio::spawn(host.run(rx));
        Self { tx }
    }

    pub async fn render(&self, url: &str, cancel: CancellationToken) -> Result<String, FetchError> {
        let (reply, response) = oneshot::channel();
        let request = RenderRequest {
            url: url.to_string(),
            cancel,
            reply,
        };
        self.tx.send(request).await.map_err(|_| {
            FetchError::new(FailureKind::RendererUnavailable, "render host stopped")
        })?;
        response.await.map_err(|_| {
            FetchError::new(FailureKind::RendererUnavailable, "render host dropped request")
        })?
    }
}

struct HostLoop {
    factory: Arc<dyn RendererFactory>,
    renderer: Option<Box<dyn PageRenderer>>,
    loads_since_recycle: u32,
    recycle_after: u32,
    cooldown: Duration,
    settle: Duration,
}

impl HostLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<RenderRequest>) {
        while let Some(request) = rx.recv().await {
            if request.reply.is_closed() {
                continue;
            }
            if request.cancel.is_cancelled() {
                let _ = request
                    .reply
                    .send(Err(FetchError::new(FailureKind::Cancelled, "render cancelled")));
                continue;
            }

            let cancel = request.cancel.clone();
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    Err(FetchError::new(FailureKind::Cancelled, "render cancelled"))
                }
                result = self.render_once(&request.url) => result,
            };

            let succeeded = match &result {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("Render of {} failed: {}", request.url, e);
                    false
                }
            };
            let _ = request.reply.send(result);

            // Housekeeping runs after the reply so it never counts against the
            // caller's watchdog.
            if succeeded {
                self.loads_since_recycle += 1;
                if self.loads_since_recycle >= self.recycle_after {
                    self.recycle().await;
                }
            } else {
                // A half-loaded or crashed renderer is not worth reusing.
                self.discard().await;
            }
        }

        self.discard().await;
    }

    async fn renderer(&mut self) -> Result<&mut Box<dyn PageRenderer>, FetchError> {
        let renderer = match self.renderer.take() {
            Some(renderer) => renderer,
            None => {
                tracing::debug!("Creating page renderer");
                self.factory.create().await?
            }
        };
        Ok(self.renderer.insert(renderer))
    }

    async fn render_once(&mut self, url: &str) -> Result<String, FetchError> {
        let settle = self.settle;
        let renderer = self.renderer().await?;

        renderer.load(url).await?;
        while !renderer.is_settled().await? {
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        renderer.rendered_html().await
    }

    async fn discard(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.close().await;
        }
        self.loads_since_recycle = 0;
    }

    async fn recycle(&mut self) {
        tracing::info!(
            "Recycling page renderer after {} loads",
            self.loads_since_recycle
        );
        self.discard().await;
        match self.factory.create().await {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => tracing::warn!("Failed to recreate page renderer: {}", e),
        }
        tokio::time::sleep(self.cooldown).await;
    }
}

/// Loads the article in the shared headless renderer and returns the rendered DOM.
pub struct SandboxedRenderFetch {
    host: RenderHost,
    timeout: Duration,
}

impl SandboxedRenderFetch {
    pub fn new(host: RenderHost, settings: &ExtractionSettings) -> Self {
        Self {
            host,
            timeout: settings.render_timeout(),
        }
    }
}

#[async_trait]
impl FetchStrategy for SandboxedRenderFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SandboxedRender
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<String, FetchError> {
        Url::parse(url).map_err(|e| FetchError::new(FailureKind::InvalidUrl, e.to_string()))?;
        self.host.render(url, cancel).await
    }
}
