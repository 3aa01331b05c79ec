use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Direct,
    SandboxedRender,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::SandboxedRender => write!(f, "sandboxed-render"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no result after {}s", after.as_secs()),
        )
    }

    /// Server-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            FailureKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    RateLimited { retry_after: Option<Duration> },
    Timeout,
    Network,
    Renderer,
    RendererUnavailable,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::RateLimited { retry_after } => match retry_after {
                Some(delay) => write!(f, "rate limited (retry after {}s)", delay.as_secs()),
                None => write!(f, "rate limited"),
            },
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Renderer => write!(f, "renderer error"),
            FailureKind::RendererUnavailable => write!(f, "renderer unavailable"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One way of turning an article link into renderable HTML.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Watchdog bound for a single attempt.
    fn timeout(&self) -> Duration;

    /// Retrieve the page. Implementations should stop work promptly once `cancel`
    /// fires; the caller has already given up on the result by then.
    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<String, FetchError>;
}
