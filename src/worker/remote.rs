use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::Worker;
use super::commands::{
    ConsumerAssignment, ProducerWorkAssignment, PublishRate, Topic, TopicsRequest, paths,
};
use crate::driver::DriverConfig;
use crate::error::{AppError, AppResult, TransportError};
use crate::metrics::{CountersStats, CumulativeLatencies, PeriodStats};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Worker endpoint in another process, reached over the JSON RPC. Transport
/// failures are surfaced, never retried here.
#[derive(Debug, Clone)]
pub struct HttpWorker {
    id: String,
    base: Url,
    client: reqwest::Client,
}

impl HttpWorker {
    /// # Errors
    ///
    /// Returns an error if `endpoint` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(endpoint: &str, request_timeout: Duration) -> AppResult<Self> {
        let mut normalized = if endpoint.contains("://") {
            endpoint.to_owned()
        } else {
            format!("http://{}", endpoint)
        };
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized).map_err(|source| {
            AppError::transport(TransportError::InvalidEndpoint {
                endpoint: endpoint.to_owned(),
                source,
            })
        })?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|source| AppError::transport(TransportError::ClientBuild { source }))?;
        Ok(Self {
            id: endpoint.trim_end_matches('/').to_owned(),
            base,
            client,
        })
    }

    fn url(&self, path: &'static str) -> AppResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|source| {
                AppError::transport(TransportError::InvalidEndpoint {
                    endpoint: self.id.clone(),
                    source,
                })
            })
    }

    async fn send(
        &self,
        path: &'static str,
        request: reqwest::RequestBuilder,
    ) -> AppResult<reqwest::Response> {
        let response = request.send().await.map_err(|source| {
            AppError::transport(TransportError::Request {
                endpoint: self.id.clone(),
                path,
                source,
            })
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(AppError::transport(TransportError::Status {
            endpoint: self.id.clone(),
            path,
            status: status.as_u16(),
            message,
        }))
    }

    async fn decode<R>(&self, path: &'static str, response: reqwest::Response) -> AppResult<R>
    where
        R: DeserializeOwned,
    {
        response.json::<R>().await.map_err(|source| {
            AppError::transport(TransportError::Decode {
                endpoint: self.id.clone(),
                path,
                source,
            })
        })
    }

    async fn post<B>(&self, path: &'static str, body: &B) -> AppResult<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        let request = self.client.post(self.url(path)?).json(body);
        self.send(path, request).await.map(|_| ())
    }

    async fn post_empty(&self, path: &'static str) -> AppResult<()> {
        let request = self.client.post(self.url(path)?);
        self.send(path, request).await.map(|_| ())
    }

    async fn post_json<B, R>(&self, path: &'static str, body: &B) -> AppResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)?).json(body);
        let response = self.send(path, request).await?;
        self.decode(path, response).await
    }

    async fn get<R>(&self, path: &'static str) -> AppResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self.client.get(self.url(path)?);
        let response = self.send(path, request).await?;
        self.decode(path, response).await
    }
}

#[async_trait]
impl Worker for HttpWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize_driver(&self, config: &DriverConfig) -> AppResult<()> {
        self.post(paths::INITIALIZE_DRIVER, config).await
    }

    async fn create_topics(&self, request: &TopicsRequest) -> AppResult<Vec<Topic>> {
        self.post_json(paths::CREATE_TOPICS, request).await
    }

    async fn notify_topic_creation(&self, topics: &[Topic]) -> AppResult<()> {
        self.post(paths::NOTIFY_TOPIC_CREATION, topics).await
    }

    async fn create_producers(&self, topics: &[String]) -> AppResult<()> {
        self.post(paths::CREATE_PRODUCERS, topics).await
    }

    async fn create_consumers(&self, assignment: &ConsumerAssignment) -> AppResult<()> {
        self.post(paths::CREATE_CONSUMERS, assignment).await
    }

    async fn probe_producers(&self) -> AppResult<()> {
        self.post_empty(paths::PROBE_PRODUCERS).await
    }

    async fn start_load(&self, assignment: &ProducerWorkAssignment) -> AppResult<()> {
        self.post(paths::START_LOAD, assignment).await
    }

    async fn adjust_publish_rate(&self, rate: f64) -> AppResult<()> {
        self.post(paths::ADJUST_PUBLISH_RATE, &PublishRate { publish_rate: rate })
            .await
    }

    async fn pause_consumers(&self) -> AppResult<()> {
        self.post_empty(paths::PAUSE_CONSUMERS).await
    }

    async fn resume_consumers(&self) -> AppResult<()> {
        self.post_empty(paths::RESUME_CONSUMERS).await
    }

    async fn pause_producers(&self) -> AppResult<()> {
        self.post_empty(paths::PAUSE_PRODUCERS).await
    }

    async fn resume_producers(&self) -> AppResult<()> {
        self.post_empty(paths::RESUME_PRODUCERS).await
    }

    async fn period_stats(&self) -> AppResult<PeriodStats> {
        self.get(paths::PERIOD_STATS).await
    }

    async fn cumulative_latencies(&self) -> AppResult<CumulativeLatencies> {
        self.get(paths::CUMULATIVE_LATENCIES).await
    }

    async fn counters_stats(&self) -> AppResult<CountersStats> {
        self.get(paths::COUNTERS_STATS).await
    }

    async fn reset_stats(&self) -> AppResult<()> {
        self.post_empty(paths::RESET_STATS).await
    }

    async fn stop_all(&self) -> AppResult<()> {
        self.post_empty(paths::STOP_ALL).await
    }

    async fn health_check(&self) -> AppResult<()> {
        let request = self.client.get(self.url(paths::HEALTH_CHECK)?);
        self.send(paths::HEALTH_CHECK, request).await.map(|_| ())
    }
}
