use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::strategy::{FailureKind, FetchError, FetchStrategy, StrategyKind};
use super::ExtractionSettings;

/// Plain HTTP GET of the article page.
pub struct DirectFetch {
    client: Client,
    timeout: Duration,
}

impl DirectFetch {
    pub fn new(settings: &ExtractionSettings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .timeout(settings.direct_timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::new(FailureKind::Network, e.to_string()))?;

        Ok(Self {
            client,
            timeout: settings.direct_timeout(),
        })
    }

    async fn get(&self, url: Url) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError::new(
                FailureKind::RateLimited { retry_after },
                status.to_string(),
            ));
        }
        if !status.is_success() {
            tracing::debug!("Direct fetch got {}", status);
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        response.text().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl FetchStrategy for DirectFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<String, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::new(FailureKind::InvalidUrl, e.to_string()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::new(FailureKind::Cancelled, "fetch cancelled")),
            result = self.get(parsed) => result,
        }
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_accepts_seconds_and_dates() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }
}
