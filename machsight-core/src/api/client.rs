//! HTTP client for the monitoring backend's REST API
//!
//! Wire shapes follow the backend's endpoints: `/health`, `/machines`,
//! `/measurements/{machine_id}`, `/events`, `/chat`, `/analyze`, `/reports`.
//! Timestamps arrive as ISO-8601 strings and are parsed leniently (see
//! [`crate::types`]).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{Error, Result};
use crate::types::{
    parse_timestamp, AnalysisResult, ChatMessage, ChatRole, EventLevel, HealthStatus, Machine,
    MachineEvent, Measurement, Report,
};

/// Number of prior chat exchanges the backend may use as context.
const CHAT_CONTEXT_LIMIT: i64 = 10;

/// Out-of-band notification about request completion.
///
/// One `RequestCompleted` fires per finished request regardless of outcome;
/// failures additionally fire `ConnectionError` with the error text.
#[derive(Debug, Clone)]
pub enum ClientSignal {
    RequestCompleted,
    ConnectionError(String),
}

/// Async REST client for the monitoring backend.
///
/// The base URL is rebindable at runtime; each request snapshots it at issue
/// time, so a rebind affects only requests started afterwards. In-flight
/// requests are never cancelled.
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: Mutex<String>,
    subscribers: Mutex<Vec<UnboundedSender<ClientSignal>>>,
}

impl ApiClient {
    /// Create a new client bound to the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: Mutex::new(normalize_url(base_url.into())),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Rebind the base URL. Only requests issued after this call use it.
    pub fn set_base_url(&self, url: impl Into<String>) {
        let url = normalize_url(url.into());
        tracing::info!(base_url = %url, "API base URL changed");
        *self.base_url.lock().expect("base_url lock poisoned") = url;
    }

    /// The currently configured base URL.
    pub fn base_url(&self) -> String {
        self.base_url.lock().expect("base_url lock poisoned").clone()
    }

    /// Subscribe to request-completion signals.
    pub fn subscribe(&self) -> UnboundedReceiver<ClientSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .push(tx);
        rx
    }

    // ==================== Health ====================

    pub async fn health_check(&self) -> Result<HealthStatus> {
        let dto: HealthDto = self.observe(self.get_json("/health", &[]).await)?;
        Ok(dto.into())
    }

    // ==================== Machines ====================

    pub async fn machines(&self) -> Result<Vec<Machine>> {
        self.observe(self.get_json("/machines", &[]).await)
    }

    pub async fn machine(&self, machine_id: i64) -> Result<Machine> {
        self.observe(self.get_json(&format!("/machines/{}", machine_id), &[]).await)
    }

    // ==================== Measurements ====================

    pub async fn measurements(
        &self,
        machine_id: i64,
        sensor_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Measurement>> {
        let mut query = Vec::new();
        if let Some(sensor) = sensor_type {
            query.push(("sensor_type", sensor.to_string()));
        }
        query.push(("limit", limit.to_string()));

        self.observe(
            self.get_json(&format!("/measurements/{}", machine_id), &query)
                .await,
        )
    }

    // ==================== Events ====================

    pub async fn events(
        &self,
        machine_id: Option<i64>,
        level: Option<EventLevel>,
        limit: u32,
    ) -> Result<Vec<MachineEvent>> {
        let mut query = Vec::new();
        if let Some(id) = machine_id {
            query.push(("machine_id", id.to_string()));
        }
        if let Some(level) = level {
            query.push(("level", level.as_str().to_string()));
        }
        query.push(("limit", limit.to_string()));

        self.observe(self.get_json("/events", &query).await)
    }

    // ==================== Chat ====================

    pub async fn send_chat(&self, message: &str, machine_id: Option<i64>) -> Result<ChatMessage> {
        let request = ChatRequest {
            message,
            machine_id,
            context_limit: CHAT_CONTEXT_LIMIT,
        };

        let dto: ChatReplyDto = self.observe(self.post_json("/chat", &request).await)?;
        Ok(dto.into())
    }

    // ==================== Analysis ====================

    pub async fn analyze(
        &self,
        machine_id: i64,
        sensor_type: Option<&str>,
        time_range_minutes: u32,
    ) -> Result<AnalysisResult> {
        let request = AnalyzeRequest {
            machine_id,
            sensor_type,
            time_range_minutes,
        };

        self.observe(self.post_json("/analyze", &request).await)
    }

    // ==================== Reports ====================

    pub async fn reports(&self, machine_id: Option<i64>, limit: u32) -> Result<Vec<Report>> {
        let mut query = Vec::new();
        if let Some(id) = machine_id {
            query.push(("machine_id", id.to_string()));
        }
        query.push(("limit", limit.to_string()));

        self.observe(self.get_json("/reports", &query).await)
    }

    // ==================== HTTP plumbing ====================

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url(), endpoint);

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        decode_response(response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url(), endpoint);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        decode_response(response).await
    }

    /// Broadcast completion signals for a finished request and pass the
    /// result through unchanged.
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        self.emit(ClientSignal::RequestCompleted);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "API request failed");
            self.emit(ClientSignal::ConnectionError(e.to_string()));
        }
        result
    }

    fn emit(&self, signal: ClientSignal) {
        let mut subscribers = self.subscribers.lock().expect("subscribers lock poisoned");
        subscribers.retain(|tx| tx.send(signal.clone()).is_ok());
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| Error::MalformedResponse(e.to_string()))
    } else {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn normalize_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Request body for POST /chat
#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    machine_id: Option<i64>,
    context_limit: i64,
}

/// Request body for POST /analyze
#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    machine_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensor_type: Option<&'a str>,
    time_range_minutes: u32,
}

/// Response from GET /health
#[derive(Deserialize)]
struct HealthDto {
    #[serde(default)]
    status: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    db_stats: HashMap<String, i64>,
}

impl From<HealthDto> for HealthStatus {
    fn from(dto: HealthDto) -> Self {
        HealthStatus {
            is_healthy: dto.status == "healthy",
            timestamp: parse_timestamp(&dto.timestamp),
            db_stats: dto.db_stats,
        }
    }
}

/// Response from POST /chat
#[derive(Deserialize)]
struct ChatReplyDto {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    sources: Vec<String>,
}

impl From<ChatReplyDto> for ChatMessage {
    fn from(dto: ChatReplyDto) -> Self {
        ChatMessage {
            role: ChatRole::Assistant,
            content: dto.answer,
            timestamp: parse_timestamp(&dto.timestamp),
            sources: dto.sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");

        client.set_base_url("  http://monitor.local:9000// ");
        assert_eq!(client.base_url(), "http://monitor.local:9000");
    }

    #[test]
    fn test_signals_reach_every_subscriber() {
        let client = ApiClient::new("http://localhost:8000").unwrap();
        let mut first = client.subscribe();
        let mut second = client.subscribe();

        let _ = client.observe::<()>(Err(Error::Transport("connection refused".into())));

        for rx in [&mut first, &mut second] {
            assert!(matches!(
                rx.try_recv().unwrap(),
                ClientSignal::RequestCompleted
            ));
            match rx.try_recv().unwrap() {
                ClientSignal::ConnectionError(msg) => {
                    assert!(msg.contains("connection refused"))
                }
                other => panic!("expected ConnectionError, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let client = ApiClient::new("http://localhost:8000").unwrap();
        let rx = client.subscribe();
        drop(rx);

        let _ = client.observe(Ok(()));
        assert!(client.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_health_dto_maps_status_string() {
        let healthy: HealthDto =
            serde_json::from_str(r#"{"status": "healthy", "timestamp": "2024-03-01T08:00:00"}"#)
                .unwrap();
        assert!(HealthStatus::from(healthy).is_healthy);

        let degraded: HealthDto =
            serde_json::from_str(r#"{"status": "degraded", "timestamp": "2024-03-01T08:00:00"}"#)
                .unwrap();
        assert!(!HealthStatus::from(degraded).is_healthy);
    }

    #[test]
    fn test_chat_request_omits_absent_machine() {
        let body = serde_json::to_value(ChatRequest {
            message: "status?",
            machine_id: None,
            context_limit: CHAT_CONTEXT_LIMIT,
        })
        .unwrap();
        assert!(body.get("machine_id").is_none());
        assert_eq!(body["context_limit"], 10);

        let body = serde_json::to_value(ChatRequest {
            message: "status?",
            machine_id: Some(3),
            context_limit: CHAT_CONTEXT_LIMIT,
        })
        .unwrap();
        assert_eq!(body["machine_id"], 3);
    }
}
