//! Apache Tika extractor.
//!
//! Sends the raw file to `PUT {tika_url}/tika/text` and reads back Tika's
//! JSON object: `X-TIKA:content` is the text, every other key becomes
//! the stored metadata.
//!
//! Retry strategy:
//! - network error or HTTP 503 → retry with exponential backoff
//!   (1s, 1.5s, 2.25s, ... capped at 5s)
//! - HTTP 422 (Tika could not parse the file) → empty content, `meta.error` set
//! - any other HTTP ≥ 400 → fail immediately

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::extract::{guess_content_type, AttachmentTextExtractor, ExtractError, Extracted};

const TIKA_CONTENT_KEY: &str = "X-TIKA:content";
const MAX_BACKOFF: Duration = Duration::from_secs(5);

pub struct TikaExtractor {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
    base_delay: Duration,
}

impl TikaExtractor {
    pub fn new(tika_url: &str, timeout: Duration, max_retries: u32) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/tika/text", tika_url.trim_end_matches('/')),
            max_retries,
            base_delay: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1.5f64.powi(attempt.saturating_sub(1).min(16) as i32);
    base.mul_f64(factor).min(MAX_BACKOFF)
}

fn split_tika_response(mut object: Map<String, Value>) -> Extracted {
    let content = match object.remove(TIKA_CONTENT_KEY) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    Extracted {
        content,
        meta: Value::Object(object),
    }
}

#[async_trait]
impl AttachmentTextExtractor for TikaExtractor {
    async fn extract(&self, path: &Path, content_type: &str) -> Result<Extracted, ExtractError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let content_type = if content_type.is_empty() {
            guess_content_type(path).unwrap_or("application/octet-stream")
        } else {
            content_type
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.base_delay, attempt)).await;
            }

            let resp = self
                .client
                .put(&self.endpoint)
                .header("Content-Type", content_type)
                .header("Accept", "application/json")
                .body(bytes.clone())
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let object: Map<String, Value> = response.json().await?;
                        return Ok(split_tika_response(object));
                    }

                    if status == StatusCode::SERVICE_UNAVAILABLE {
                        warn!(path = %path.display(), attempt, "Tika busy, retrying");
                        last_err = Some(ExtractError::Tika(status.to_string()));
                        continue;
                    }

                    if status == StatusCode::UNPROCESSABLE_ENTITY {
                        return Ok(Extracted {
                            content: String::new(),
                            meta: json!({ "error": status.to_string() }),
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(ExtractError::Tika(format!("{}: {}", status, body_text.trim())));
                }
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "Tika request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ExtractError::Tika("no attempts made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::put, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn sample_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();
        (dir, path)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1500));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
    }

    #[test]
    fn test_split_response() {
        let mut obj = Map::new();
        obj.insert(TIKA_CONTENT_KEY.into(), json!("hello"));
        obj.insert("Content-Type".into(), json!("application/pdf"));
        let out = split_tika_response(obj);
        assert_eq!(out.content, "hello");
        assert_eq!(out.meta, json!({ "Content-Type": "application/pdf" }));
    }

    #[tokio::test]
    async fn test_retries_on_503_then_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/tika/text",
            put(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AxumStatus::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(json!({
                            "X-TIKA:content": "quarterly ledger",
                            "Content-Type": "application/pdf"
                        })))
                    }
                }
            }),
        );
        let url = serve(app).await;
        let (_dir, path) = sample_file();

        let tika = TikaExtractor::new(&url, Duration::from_secs(5), 3)
            .unwrap()
            .with_base_delay(Duration::from_millis(1));
        let out = tika.extract(&path, "application/pdf").await.unwrap();

        assert_eq!(out.content, "quarterly ledger");
        assert_eq!(out.meta["Content-Type"], "application/pdf");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unprocessable_yields_error_meta() {
        let app = Router::new().route("/tika/text", put(|| async { AxumStatus::UNPROCESSABLE_ENTITY }));
        let url = serve(app).await;
        let (_dir, path) = sample_file();

        let tika = TikaExtractor::new(&url, Duration::from_secs(5), 0).unwrap();
        let out = tika.extract(&path, "application/pdf").await.unwrap();

        assert!(out.content.is_empty());
        assert!(out.meta["error"].as_str().unwrap().starts_with("422"));
    }

    #[tokio::test]
    async fn test_other_errors_fail_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/tika/text",
            put(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::INTERNAL_SERVER_ERROR
                }
            }),
        );
        let url = serve(app).await;
        let (_dir, path) = sample_file();

        let tika = TikaExtractor::new(&url, Duration::from_secs(5), 3)
            .unwrap()
            .with_base_delay(Duration::from_millis(1));
        let err = tika.extract(&path, "application/pdf").await.unwrap_err();

        assert!(matches!(err, ExtractError::Tika(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let app = Router::new().route("/tika/text", put(|| async { AxumStatus::SERVICE_UNAVAILABLE }));
        let url = serve(app).await;
        let (_dir, path) = sample_file();

        let tika = TikaExtractor::new(&url, Duration::from_secs(5), 2)
            .unwrap()
            .with_base_delay(Duration::from_millis(1));
        let err = tika.extract(&path, "").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
