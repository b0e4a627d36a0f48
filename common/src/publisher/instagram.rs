// Instagram publisher: container create, resumable upload, processing poll,
// publish, permalink lookup. Each step classifies platform responses as
// transient or permanent; only transient failures are retried, and only
// inside the budgets configured per step.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::config::InstagramSettings;
use crate::errors::PublishError;
use crate::models::{ContentItem, MediaKind, Platform, PlatformCredential};
use crate::publisher::{PlatformPublisher, PublishOutcome};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct InstagramConfig {
    pub base_url: String,
    pub api_version: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub call_timeout: Duration,
}

impl From<&InstagramSettings> for InstagramConfig {
    fn from(settings: &InstagramSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_version: settings.api_version.clone(),
            poll_interval: Duration::from_secs(settings.poll_interval_seconds),
            poll_max_attempts: settings.poll_max_attempts,
            call_timeout: Duration::from_secs(settings.call_timeout_seconds),
        }
    }
}

/// Container handle returned by the create step. `upload_uri` is present
/// only for media that needs a byte upload (video); image containers are
/// filled server-side from the media URL.
#[derive(Debug)]
struct Container {
    id: String,
    upload_uri: Option<String>,
}

pub struct InstagramPublisher {
    http: reqwest::Client,
    config: InstagramConfig,
    upload_retry: Arc<dyn RetryStrategy>,
    publish_retry: Arc<dyn RetryStrategy>,
    breaker: CircuitBreaker,
}

impl InstagramPublisher {
    pub fn new(settings: &InstagramSettings, breaker: CircuitBreaker) -> Result<Self, PublishError> {
        // No per-request timeout: every request runs inside the whole-call
        // deadline enforced in publish(), which is the one budget that
        // matters here.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                PublishError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            config: InstagramConfig::from(settings),
            upload_retry: Arc::new(ExponentialBackoff::with_config(
                1_000,
                30_000,
                0.1,
                settings.upload_max_retries,
            )),
            publish_retry: Arc::new(ExponentialBackoff::with_config(
                1_000,
                30_000,
                0.1,
                settings.publish_max_retries,
            )),
            breaker,
        })
    }

    /// Swap the retry strategies, used by tests to avoid real backoff waits.
    pub fn with_retry_strategies(
        mut self,
        upload: Arc<dyn RetryStrategy>,
        publish: Arc<dyn RetryStrategy>,
    ) -> Self {
        self.upload_retry = upload;
        self.publish_retry = publish;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    /// Send a request behind the circuit breaker. Network failures and 5xx
    /// responses count against the breaker; 4xx responses pass through for
    /// the caller to classify, since a rejected payload says nothing about
    /// upstream health.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, PublishError> {
        let result = self
            .breaker
            .call(async {
                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        PublishError::Transient(format!("Network failure: {}", e))
                    } else {
                        PublishError::Transient(format!("Request failed: {}", e))
                    }
                })?;

                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    let body = response.text().await.unwrap_or_default();
                    return Err(PublishError::Transient(format!("HTTP {}: {}", status, body)));
                }

                Ok(response)
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(CircuitBreakerError::CircuitOpen { label }) => {
                return Err(PublishError::CircuitOpen(label));
            }
            Err(CircuitBreakerError::RequestFailed(e)) => return Err(e),
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            PublishError::MalformedResponse(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            return Err(classify_client_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            PublishError::MalformedResponse(format!("Invalid JSON response: {}", e))
        })
    }

    /// Retry a step over transient failures within the given budget. The
    /// first non-transient error short-circuits.
    async fn with_retries<F, Fut>(
        &self,
        strategy: &dyn RetryStrategy,
        step: &str,
        mut op: F,
    ) -> Result<Value, PublishError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Value, PublishError>>,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match strategy.next_delay(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        warn!(
                            step,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(PublishError::RetriesExhausted {
                            attempts: attempt + 1,
                            last: e.to_string(),
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// ContainerCreate: request an upload container. Any failure here is
    /// terminal for the call; a rejected create signals a content or
    /// credential problem that retrying cannot fix.
    #[instrument(skip(self, credential, item), fields(item_id = %item.id))]
    async fn create_container(
        &self,
        credential: &PlatformCredential,
        item: &ContentItem,
    ) -> Result<Container, PublishError> {
        let url = self.endpoint(&format!("{}/media", credential.external_account_id));

        let mut params = vec![("access_token", credential.access_token.clone())];
        if let Some(caption) = &item.caption {
            params.push(("caption", caption.clone()));
        }
        match item.media_kind {
            MediaKind::Image => {
                params.push(("image_url", item.media_url.clone()));
            }
            MediaKind::Video => {
                params.push(("media_type", "REELS".to_string()));
                params.push(("upload_type", "resumable".to_string()));
            }
        }

        let body = self.execute(self.http.post(&url).form(&params)).await?;

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PublishError::MalformedResponse("Container response missing id".to_string())
            })?
            .to_string();

        let upload_uri = body
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string);

        debug!(container_id = %id, has_upload_uri = upload_uri.is_some(), "Container created");

        Ok(Container { id, upload_uri })
    }

    /// Uploading: hand the media URL to the resumable endpoint. The platform
    /// pulls the bytes itself; transient failures are retried with backoff.
    #[instrument(skip(self, credential, item), fields(item_id = %item.id))]
    async fn upload(
        &self,
        upload_uri: &str,
        credential: &PlatformCredential,
        item: &ContentItem,
    ) -> Result<(), PublishError> {
        self.with_retries(self.upload_retry.as_ref(), "upload", || {
            self.execute(
                self.http
                    .post(upload_uri)
                    .header("Authorization", format!("OAuth {}", credential.access_token))
                    .header("offset", "0")
                    .header("file_url", item.media_url.clone()),
            )
        })
        .await?;

        debug!("Upload accepted");
        Ok(())
    }

    /// AwaitingProcessing: poll the container status until FINISHED, up to
    /// the poll budget. A busy upstream spends a poll attempt and the loop
    /// keeps going; only permanent errors short-circuit the remaining budget.
    #[instrument(skip(self, credential), fields(container_id = %container_id))]
    async fn wait_for_processing(
        &self,
        container_id: &str,
        credential: &PlatformCredential,
    ) -> Result<(), PublishError> {
        let url = self.endpoint(container_id);

        for attempt in 1..=self.config.poll_max_attempts {
            let poll = self
                .execute(self.http.get(&url).query(&[
                    ("fields", "status_code"),
                    ("access_token", credential.access_token.as_str()),
                ]))
                .await;

            let body = match poll {
                Ok(body) => body,
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Status poll failed transiently");
                    if attempt < self.config.poll_max_attempts {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let status_code = body
                .get("status_code")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PublishError::MalformedResponse(
                        "Status response missing status_code".to_string(),
                    )
                })?;

            match status_code {
                "FINISHED" => {
                    debug!(attempt, "Container processing finished");
                    return Ok(());
                }
                "IN_PROGRESS" => {
                    debug!(attempt, "Container still processing");
                    if attempt < self.config.poll_max_attempts {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                }
                "ERROR" | "EXPIRED" => {
                    return Err(PublishError::Permanent(format!(
                        "Container entered {} state",
                        status_code
                    )));
                }
                other => {
                    return Err(PublishError::MalformedResponse(format!(
                        "Unknown container status: {}",
                        other
                    )));
                }
            }
        }

        Err(PublishError::PollBudgetExhausted {
            attempts: self.config.poll_max_attempts,
        })
    }

    /// Publishing: finalize the container into a live media object.
    #[instrument(skip(self, credential), fields(container_id = %container_id))]
    async fn publish_container(
        &self,
        container_id: &str,
        credential: &PlatformCredential,
    ) -> Result<String, PublishError> {
        let url = self.endpoint(&format!(
            "{}/media_publish",
            credential.external_account_id
        ));

        let body = self
            .with_retries(self.publish_retry.as_ref(), "publish", || {
                self.execute(self.http.post(&url).form(&[
                    ("creation_id", container_id),
                    ("access_token", credential.access_token.as_str()),
                ]))
            })
            .await?;

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::MalformedResponse("Publish response missing media id".to_string())
            })
    }

    /// Permalink lookup is best effort; a publication without a link is
    /// still Published.
    async fn fetch_permalink(
        &self,
        media_id: &str,
        credential: &PlatformCredential,
    ) -> Option<String> {
        let url = self.endpoint(media_id);

        match self
            .execute(self.http.get(&url).query(&[
                ("fields", "permalink"),
                ("access_token", credential.access_token.as_str()),
            ]))
            .await
        {
            Ok(body) => body
                .get("permalink")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                debug!(media_id = %media_id, error = %e, "Permalink lookup failed");
                None
            }
        }
    }

    async fn run_protocol(
        &self,
        credential: &PlatformCredential,
        item: &ContentItem,
    ) -> Result<PublishOutcome, PublishError> {
        let container = self.create_container(credential, item).await?;

        if let Some(upload_uri) = &container.upload_uri {
            self.upload(upload_uri, credential, item).await?;
        }

        self.wait_for_processing(&container.id, credential).await?;

        let media_id = self.publish_container(&container.id, credential).await?;
        let public_url = self.fetch_permalink(&media_id, credential).await;

        info!(media_id = %media_id, "Content published");

        Ok(PublishOutcome { public_url })
    }
}

#[async_trait]
impl PlatformPublisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    /// The whole call runs under a hard wall-clock deadline on top of the
    /// per-step budgets; a pathologically slow upstream yields a timeout
    /// error rather than an unbounded hang.
    #[instrument(skip(self, credential, item), fields(
        item_id = %item.id,
        account = %credential.external_account_id
    ))]
    async fn publish(
        &self,
        credential: &PlatformCredential,
        item: &ContentItem,
    ) -> Result<PublishOutcome, PublishError> {
        let deadline = self.config.call_timeout;

        match tokio::time::timeout(deadline, self.run_protocol(credential, item)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(deadline.as_secs())),
        }
    }
}

/// Map a non-success, non-5xx platform response to an error. Graph-style
/// error envelopes carry an `is_transient` hint which overrides the default
/// 4xx-is-permanent rule (rate limiting arrives as 400 with the hint set).
fn classify_client_error(status: StatusCode, body: &str) -> PublishError {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown platform error");

            if error
                .get("is_transient")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                return PublishError::Transient(format!("HTTP {}: {}", status, message));
            }

            return PublishError::Permanent(format!("HTTP {}: {}", status, message));
        }
    }

    PublishError::Permanent(format!("HTTP {}: {}", status, body))
}
