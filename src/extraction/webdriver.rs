use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::render::{PageRenderer, RendererFactory};
use super::strategy::{FailureKind, FetchError};

#[derive(Debug, Deserialize)]
struct WebDriverResponse<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WebDriverFailure {
    error: String,
    #[serde(default)]
    message: String,
}

/// Creates headless browser sessions on a WebDriver endpoint
/// (chromedriver, geckodriver, selenium).
pub struct WebDriverFactory {
    client: Client,
    base_url: String,
    user_agent: String,
}

impl WebDriverFactory {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
        }
    }

    fn capabilities(&self) -> Value {
        let agent = format!("--user-agent={}", self.user_agent);
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "pageLoadStrategy": "normal",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--disable-gpu", "--no-sandbox", agent]
                    },
                    "moz:firefoxOptions": {
                        "args": ["-headless"],
                        "prefs": { "general.useragent.override": self.user_agent }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RendererFactory for WebDriverFactory {
    async fn create(&self) -> Result<Box<dyn PageRenderer>, FetchError> {
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&self.capabilities())
            .send()
            .await
            .map_err(unavailable)?;
        let session: NewSession = decode(response).await?;
        tracing::debug!("Opened WebDriver session {}", session.session_id);

        Ok(Box::new(WebDriverRenderer {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session.session_id),
        }))
    }
}

/// One WebDriver browser session.
pub struct WebDriverRenderer {
    client: Client,
    session_url: String,
}

impl WebDriverRenderer {
    async fn execute(&self, script: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .post(format!("{}/execute/sync", self.session_url))
            .json(&json!({ "script": script, "args": [] }))
            .send()
            .await
            .map_err(renderer_error)?;
        decode(response).await
    }
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    async fn load(&mut self, url: &str) -> Result<(), FetchError> {
        let response = self
            .client
            .post(format!("{}/url", self.session_url))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(renderer_error)?;
        let _: Value = decode(response).await?;
        Ok(())
    }

    async fn is_settled(&mut self) -> Result<bool, FetchError> {
        let state = self.execute("return document.readyState").await?;
        Ok(state.as_str() == Some("complete"))
    }

    async fn rendered_html(&mut self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(format!("{}/source", self.session_url))
            .send()
            .await
            .map_err(renderer_error)?;
        decode(response).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.delete(&self.session_url).send().await {
            tracing::debug!("Failed to close WebDriver session: {}", e);
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WebDriverResponse<WebDriverFailure>>(&body)
            .map(|failure| format!("{}: {}", failure.value.error, failure.value.message))
            .unwrap_or_else(|_| status.to_string());
        return Err(FetchError::new(FailureKind::Renderer, message));
    }

    response
        .json::<WebDriverResponse<T>>()
        .await
        .map(|body| body.value)
        .map_err(renderer_error)
}

fn renderer_error(err: reqwest::Error) -> FetchError {
    FetchError::new(FailureKind::Renderer, err.to_string())
}

fn unavailable(err: reqwest::Error) -> FetchError {
    FetchError::new(FailureKind::RendererUnavailable, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn renders_through_a_webdriver_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "value": { "sessionId": "abc", "capabilities": {} } }),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/url"))
            .and(body_partial_json(json!({ "url": "https://news.example/a" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": "complete" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/abc/source"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": "<html>rendered</html>" })),
            )
            .mount(&server)
            .await;

        let factory = WebDriverFactory::new(server.uri(), "test-agent");
        let mut renderer = factory.create().await.unwrap();
        renderer.load("https://news.example/a").await.unwrap();
        assert!(renderer.is_settled().await.unwrap());
        assert_eq!(
            renderer.rendered_html().await.unwrap(),
            "<html>rendered</html>"
        );
    }

    #[tokio::test]
    async fn webdriver_errors_are_renderer_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "value": { "sessionId": "abc" } }),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/url"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": { "error": "unknown error", "message": "tab crashed" }
            })))
            .mount(&server)
            .await;

        let factory = WebDriverFactory::new(server.uri(), "test-agent");
        let mut renderer = factory.create().await.unwrap();
        let err = renderer.load("https://news.example/a").await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Renderer);
        assert_eq!(err.message, "unknown error: tab crashed");
    }
}
