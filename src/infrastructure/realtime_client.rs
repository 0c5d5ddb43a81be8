use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_stream::{EventStreamParser, RealtimeEvent};
use crate::infrastructure::remote_store::{LiveSubscription, RemoteStore};
use crate::infrastructure::snapshot_tree::{SnapshotTree, split_path};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

const STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Supplies the bearer token appended to database requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn id_token(&self) -> Result<Option<String>, InfraError>;
}

/// REST and event-stream access to a realtime database.
#[derive(Clone)]
pub struct ReqwestRealtimeStore {
    client: Client,
    database_url: String,
    tokens: Arc<dyn TokenSource>,
    reconnect_delay: Duration,
    open_timeout: Duration,
}

#[derive(Debug, serde::Deserialize)]
struct PushResponse {
    name: String,
}

impl ReqwestRealtimeStore {
    pub fn new(database_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            database_url: database_url.into().trim_end_matches('/').to_string(),
            tokens,
            reconnect_delay: STREAM_RECONNECT_DELAY,
            open_timeout: STREAM_OPEN_TIMEOUT,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Bounds how long opening an event stream may wait for response headers.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    async fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        let token = self.tokens.id_token().await?;
        resource_url(&self.database_url, path, token.as_deref())
    }

    fn http_error(status: reqwest::StatusCode, body: &str, operation: &str) -> InfraError {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value.get("error").and_then(Value::as_str).map(ToOwned::to_owned))
            .unwrap_or_else(|| body.trim().to_string());
        if status.is_server_error() {
            return InfraError::Network(format!(
                "{operation} failed with http {}: {detail}",
                status.as_u16()
            ));
        }
        if detail.is_empty() {
            InfraError::Remote(format!("{operation} failed with http {}", status.as_u16()))
        } else {
            InfraError::Remote(format!("{operation} failed: {detail}"))
        }
    }

    async fn read_body(response: reqwest::Response, operation: &str) -> Result<String, InfraError> {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading {operation} response: {error}"))
        })?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body, operation));
        }
        Ok(body)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<String, InfraError> {
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error during {operation}: {error}")))?;
        Self::read_body(response, operation).await
    }
}

/// Builds `<database>/<path>.json` with the optional `auth` query parameter.
pub fn resource_url(database_url: &str, path: &str, token: Option<&str>) -> Result<Url, InfraError> {
    let mut url = Url::parse(database_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid database url: {error}")))?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            InfraError::InvalidConfig("database url cannot be a base".to_string())
        })?;
        segments.pop_if_empty();
        let parts = split_path(path);
        match parts.split_last() {
            Some((last, parents)) => {
                segments.extend(parents);
                segments.push(&format!("{last}.json"));
            }
            None => {
                segments.push(".json");
            }
        }
    }
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("auth", token);
    }
    Ok(url)
}

#[async_trait]
impl RemoteStore for ReqwestRealtimeStore {
    async fn push(&self, path: &str, value: Value) -> Result<String, InfraError> {
        let endpoint = self.endpoint(path).await?;
        let body = self.send(self.client.post(endpoint).json(&value), "push").await?;
        let payload: PushResponse = serde_json::from_str(&body)
            .map_err(|error| InfraError::Remote(format!("invalid push response: {error}")))?;
        Ok(payload.name)
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), InfraError> {
        let endpoint = self.endpoint(path).await?;
        self.send(self.client.put(endpoint).json(&value), "set").await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), InfraError> {
        let endpoint = self.endpoint(path).await?;
        self.send(self.client.patch(endpoint).json(&fields), "update").await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, InfraError> {
        let endpoint = self.endpoint(path).await?;
        let body = self.send(self.client.get(endpoint), "get").await?;
        let value: Value = serde_json::from_str(&body)?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn get_key_range(
        &self,
        path: &str,
        start: &str,
        end: &str,
    ) -> Result<Map<String, Value>, InfraError> {
        let mut endpoint = self.endpoint(path).await?;
        endpoint
            .query_pairs_mut()
            .append_pair("orderBy", "\"$key\"")
            .append_pair("startAt", &format!("\"{start}\""))
            .append_pair("endAt", &format!("\"{end}\""));
        let body = self.send(self.client.get(endpoint), "range query").await?;
        match serde_json::from_str::<Value>(&body)? {
            Value::Object(children) => {
                let mut sorted = children.into_iter().collect::<Vec<_>>();
                sorted.sort_by(|left, right| left.0.cmp(&right.0));
                Ok(sorted.into_iter().collect())
            }
            _ => Ok(Map::new()),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), InfraError> {
        let endpoint = self.endpoint(path).await?;
        self.send(self.client.delete(endpoint), "remove").await?;
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<LiveSubscription, InfraError> {
        let response = self.open_stream(path).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let store = self.clone();
        let path = path.to_string();

        let task = tokio::spawn(async move {
            let mut response = Some(response);
            loop {
                let current = match response.take() {
                    Some(current) => current,
                    None => match store.open_stream(&path).await {
                        Ok(current) => current,
                        Err(error) => {
                            warn!(path = %path, error = %error, "realtime stream reconnect failed");
                            if sender.is_closed() {
                                return;
                            }
                            tokio::time::sleep(store.reconnect_delay).await;
                            continue;
                        }
                    },
                };

                match pump_stream(current.bytes_stream(), &sender).await {
                    StreamEnd::Closed => return,
                    StreamEnd::Cancelled(reason) => {
                        warn!(path = %path, reason = %reason, "realtime stream cancelled by server");
                        return;
                    }
                    StreamEnd::Reauthenticate => {
                        debug!(path = %path, "realtime stream credentials revoked; reconnecting");
                    }
                    StreamEnd::Disconnected => {
                        debug!(path = %path, "realtime stream disconnected; reconnecting");
                        tokio::time::sleep(store.reconnect_delay).await;
                    }
                }
            }
        });

        Ok(LiveSubscription::with_task(receiver, task))
    }
}

impl ReqwestRealtimeStore {
    async fn open_stream(&self, path: &str) -> Result<reqwest::Response, InfraError> {
        let endpoint = self.endpoint(path).await?;
        let request = self
            .client
            .get(endpoint)
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.open_timeout, request)
            .await
            .map_err(|_| {
                InfraError::Network(format!(
                    "realtime stream did not open within {} ms",
                    self.open_timeout.as_millis()
                ))
            })?
            .map_err(|error| InfraError::Network(format!("failed opening realtime stream: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::http_error(status, &body, "subscribe"));
        }
        Ok(response)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The subscriber went away.
    Closed,
    Cancelled(String),
    /// The token was revoked; reopen at once with a fresh one.
    Reauthenticate,
    Disconnected,
}

/// Forwards the whole reassembled tree after every data event.
async fn pump_stream<S, B, E>(
    chunks: S,
    sender: &mpsc::UnboundedSender<Option<Value>>,
) -> StreamEnd
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut parser = EventStreamParser::default();
    let mut tree = SnapshotTree::default();

    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                debug!(error = %error, "realtime stream read failed");
                return StreamEnd::Disconnected;
            }
        };

        for event in parser.feed(chunk.as_ref()) {
            match RealtimeEvent::parse(&event) {
                Ok(Some(RealtimeEvent::Cancel(reason))) => return StreamEnd::Cancelled(reason),
                Ok(Some(RealtimeEvent::AuthRevoked)) => return StreamEnd::Reauthenticate,
                Ok(Some(parsed)) => {
                    if parsed.apply(&mut tree) && sender.send(tree.root()).is_err() {
                        return StreamEnd::Closed;
                    }
                }
                Ok(None) => {}
                Err(error) => warn!(error = %error, "ignoring malformed realtime event"),
            }
        }
    }

    if sender.is_closed() {
        StreamEnd::Closed
    } else {
        StreamEnd::Disconnected
    }
}
