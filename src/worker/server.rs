use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Worker;
use super::commands::{
    ConsumerAssignment, ProducerWorkAssignment, PublishRate, StatusResponse, Topic, TopicsRequest,
    paths,
};
use super::http::{HttpError, HttpRequest, read_http_request, write_error_response, write_json_response};
use crate::driver::DriverConfig;
use crate::error::{AppError, AppResult};

/// Serves `worker` over HTTP until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read.
pub async fn serve_worker(
    listener: TcpListener,
    worker: Arc<dyn Worker>,
    cancel: CancellationToken,
) -> AppResult<()> {
    let addr = listener.local_addr()?;
    info!("Worker {} listening on http://{}", worker.id(), addr);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accept = listener.accept() => {
                let (socket, peer) = match accept {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("Failed to accept connection: {}", err);
                        continue;
                    }
                };
                debug!("Connection from {}", peer);
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    handle_connection(socket, worker.as_ref()).await;
                });
            }
        }
    }
    info!("Worker {} stopped listening", worker.id());
    Ok(())
}

async fn handle_connection(mut socket: TcpStream, worker: &dyn Worker) {
    let request = match read_http_request(&mut socket).await {
        Ok(request) => request,
        Err(err) => {
            if write_error_response(&mut socket, err.status, &err.message)
                .await
                .is_err()
            {
                // Socket closed while writing error response.
            }
            return;
        }
    };

    let written = match route(worker, &request).await {
        Ok(body) => write_json_response(&mut socket, 200, &body).await,
        Err(err) => {
            if err.status >= 500 {
                warn!("{} {} failed: {}", request.method, request.path, err.message);
            }
            write_error_response(&mut socket, err.status, &err.message).await
        }
    };
    if let Err(err) = written {
        debug!("Failed to write response: {}", err);
    }
}

async fn route(worker: &dyn Worker, request: &HttpRequest) -> Result<serde_json::Value, HttpError> {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", paths::INITIALIZE_DRIVER) => {
            let config: DriverConfig = parse_body(&request.body)?;
            ok(worker.initialize_driver(&config).await)
        }
        ("POST", paths::CREATE_TOPICS) => {
            let topics_request: TopicsRequest = parse_body(&request.body)?;
            reply(worker.create_topics(&topics_request).await)
        }
        ("POST", paths::NOTIFY_TOPIC_CREATION) => {
            let topics: Vec<Topic> = parse_body(&request.body)?;
            ok(worker.notify_topic_creation(&topics).await)
        }
        ("POST", paths::CREATE_PRODUCERS) => {
            let topics: Vec<String> = parse_body(&request.body)?;
            ok(worker.create_producers(&topics).await)
        }
        ("POST", paths::CREATE_CONSUMERS) => {
            let assignment: ConsumerAssignment = parse_body(&request.body)?;
            ok(worker.create_consumers(&assignment).await)
        }
        ("POST", paths::PROBE_PRODUCERS) => ok(worker.probe_producers().await),
        ("POST", paths::START_LOAD) => {
            let assignment: ProducerWorkAssignment = parse_body(&request.body)?;
            ok(worker.start_load(&assignment).await)
        }
        ("POST", paths::ADJUST_PUBLISH_RATE) => {
            let rate: PublishRate = parse_body(&request.body)?;
            ok(worker.adjust_publish_rate(rate.publish_rate).await)
        }
        ("POST", paths::PAUSE_CONSUMERS) => ok(worker.pause_consumers().await),
        ("POST", paths::RESUME_CONSUMERS) => ok(worker.resume_consumers().await),
        ("POST", paths::PAUSE_PRODUCERS) => ok(worker.pause_producers().await),
        ("POST", paths::RESUME_PRODUCERS) => ok(worker.resume_producers().await),
        ("POST", paths::RESET_STATS) => ok(worker.reset_stats().await),
        ("POST", paths::STOP_ALL) => ok(worker.stop_all().await),
        ("GET", paths::PERIOD_STATS) => reply(worker.period_stats().await),
        ("GET", paths::CUMULATIVE_LATENCIES) => reply(worker.cumulative_latencies().await),
        ("GET", paths::COUNTERS_STATS) => reply(worker.counters_stats().await),
        ("GET", paths::HEALTH_CHECK) => ok(worker.health_check().await),
        (method, path) if paths::ALL.contains(&path) => Err(HttpError::new(
            405,
            format!("Method {} not allowed for {}", method, path),
        )),
        (_, path) => Err(HttpError::new(404, format!("Unknown path {}", path))),
    }
}

fn parse_body<T>(body: &[u8]) -> Result<T, HttpError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|err| HttpError::new(400, format!("Invalid JSON: {}", err)))
}

fn ok(result: AppResult<()>) -> Result<serde_json::Value, HttpError> {
    reply(result.map(|()| StatusResponse::OK))
}

fn reply<T>(result: AppResult<T>) -> Result<serde_json::Value, HttpError>
where
    T: Serialize,
{
    let value = result.map_err(|err| HttpError::new(status_for(&err), err.to_string()))?;
    serde_json::to_value(value).map_err(|err| HttpError::new(500, format!("Failed to encode response: {}", err)))
}

pub(super) const fn status_for(err: &AppError) -> u16 {
    match err {
        AppError::Config(_) => 400,
        AppError::Driver(crate::error::DriverError::AlreadyActive) => 409,
        AppError::Io { .. }
        | AppError::Json { .. }
        | AppError::Join { .. }
        | AppError::Driver(_)
        | AppError::Provisioning(_)
        | AppError::Transport(_)
        | AppError::Aggregation(_)
        | AppError::Metrics(_) => 500,
    }
}
