//! Background extraction of readable article content.

mod coordinator;
mod direct;
mod render;
mod retry;
mod strategy;
mod webdriver;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use coordinator::{ArticleStore, DrainReport, ExtractOutcome, ExtractionCoordinator, FailureReason};
pub use direct::DirectFetch;
pub use render::{
    PageRenderer, RenderHost, RendererFactory, SandboxedRenderFetch, UnconfiguredRenderer,
};
pub use retry::{RetryDecision, RetryLedger};
pub use strategy::{FailureKind, FetchError, FetchStrategy, StrategyKind};
pub use webdriver::{WebDriverFactory, WebDriverRenderer};

/// Tunables for the extraction pipeline. Defaults match long-standing behaviour and
/// can be overridden from the `[extraction]` table of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub direct_timeout_secs: u64,
    pub render_timeout_secs: u64,
    pub min_content_chars: usize,
    pub max_attempts: u32,
    /// Upper bound on a server's `Retry-After` hint.
    pub max_retry_after_secs: u64,
    /// Successful renderer loads before the renderer is torn down and rebuilt.
    pub renderer_recycle_after: u32,
    pub renderer_cooldown_ms: u64,
    /// Extra wait after the page reports complete, for late scripts.
    pub render_settle_ms: u64,
    pub user_agent: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            direct_timeout_secs: 30,
            render_timeout_secs: 45,
            min_content_chars: crate::content::MIN_CONTENT_CHARS,
            max_attempts: 3,
            max_retry_after_secs: 3_600,
            renderer_recycle_after: 20,
            renderer_cooldown_ms: 2_000,
            render_settle_ms: 1_500,
            user_agent: USER_AGENT_STRING.to_string(),
        }
    }
}

impl ExtractionSettings {
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    pub fn renderer_cooldown(&self) -> Duration {
        Duration::from_millis(self.renderer_cooldown_ms)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }
}

pub const USER_AGENT_STRING: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
