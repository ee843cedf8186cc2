use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::device::DeviceState;
use crate::dings::Ding;
use crate::error::RestError;

pub const DEFAULT_API_BASE: &str = "https://api.ring.com/clients_api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    /// Path relative to the API base, without a leading slash.
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl RestRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body,
        }
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestResponse {
    pub body: Bytes,
    /// Server clock at response time, epoch milliseconds.
    pub response_timestamp_ms: i64,
}

impl RestResponse {
    pub fn json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        serde_json::from_slice(&self.body).map_err(|err| RestError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}

/// Transport for the vendor REST API. Authentication and HTTP-level
/// retries belong to the implementation.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn request(&self, request: RestRequest) -> Result<RestResponse, RestError>;
}

pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRestClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|err| RestError::Request {
                path: String::new(),
                message: err.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn request(&self, request: RestRequest) -> Result<RestResponse, RestError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let request_failed = |err: reqwest::Error| RestError::Request {
            path: request.path.clone(),
            message: err.to_string(),
        };

        let response = builder.send().await.map_err(request_failed)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status {
                path: request.path.clone(),
                status: status.as_u16(),
            });
        }

        let response_timestamp_ms = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|ts| ts.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let body = response.bytes().await.map_err(request_failed)?;
        debug!(path = %request.path, status = status.as_u16(), len = body.len(), "rest response");

        Ok(RestResponse {
            body,
            response_timestamp_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraHealth {
    pub id: u64,
    #[serde(default)]
    pub wifi_name: Option<String>,
    #[serde(default)]
    pub battery_percentage: Option<serde_json::Value>,
    #[serde(default)]
    pub latest_signal_strength: Option<i64>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDing {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub kind: String,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub recording: Option<RecordingStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceListing {
    #[serde(default)]
    pub doorbots: Vec<DeviceState>,
    #[serde(default)]
    pub authorized_doorbots: Vec<DeviceState>,
    #[serde(default)]
    pub stickup_cams: Vec<DeviceState>,
}

impl DeviceListing {
    pub fn find(&self, device_id: u64) -> Option<(&DeviceState, bool)> {
        let doorbot = self
            .doorbots
            .iter()
            .chain(&self.authorized_doorbots)
            .find(|d| d.id == device_id)
            .map(|d| (d, true));
        doorbot.or_else(|| {
            self.stickup_cams
                .iter()
                .find(|d| d.id == device_id)
                .map(|d| (d, false))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTimestamp {
    /// Capture time of the newest snapshot, 0 when none was ever taken.
    pub timestamp_ms: i64,
    pub response_timestamp_ms: i64,
}

#[derive(Deserialize)]
struct TimestampsBody {
    #[serde(default)]
    timestamps: Vec<TimestampEntry>,
}

#[derive(Deserialize)]
struct TimestampEntry {
    timestamp: i64,
}

#[derive(Deserialize)]
struct HealthBody {
    device_health: CameraHealth,
}

#[derive(Deserialize)]
struct ShareBody {
    url: String,
}

pub async fn fetch_devices(client: &dyn RestClient) -> Result<DeviceListing, RestError> {
    let path = "ring_devices";
    client.request(RestRequest::get(path)).await?.json(path)
}

pub async fn fetch_active_dings(client: &dyn RestClient) -> Result<Vec<Ding>, RestError> {
    let path = "dings/active";
    client.request(RestRequest::get(path)).await?.json(path)
}

/// Typed endpoints for a single device.
#[derive(Clone)]
pub struct CameraApi {
    client: Arc<dyn RestClient>,
    device_id: u64,
}

impl CameraApi {
    pub fn new(client: Arc<dyn RestClient>, device_id: u64) -> Self {
        Self { client, device_id }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn client(&self) -> &Arc<dyn RestClient> {
        &self.client
    }

    fn doorbot_path(&self, path: &str) -> String {
        format!("doorbots/{}/{}", self.device_id, path)
    }

    pub async fn set_light(&self, on: bool) -> Result<(), RestError> {
        let state = if on { "on" } else { "off" };
        let path = self.doorbot_path(&format!("floodlight_light_{state}"));
        self.client.request(RestRequest::put(path)).await?;
        Ok(())
    }

    pub async fn set_siren(&self, on: bool) -> Result<(), RestError> {
        let state = if on { "on" } else { "off" };
        let path = self.doorbot_path(&format!("siren_{state}"));
        self.client.request(RestRequest::put(path)).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<CameraHealth, RestError> {
        let path = self.doorbot_path("health");
        let body: HealthBody = self
            .client
            .request(RestRequest::get(path.clone()))
            .await?
            .json(&path)?;
        Ok(body.device_health)
    }

    pub async fn start_video_on_demand(&self) -> Result<(), RestError> {
        let path = self.doorbot_path("vod");
        self.client.request(RestRequest::post(path, None)).await?;
        Ok(())
    }

    pub async fn snapshot_timestamp(&self) -> Result<SnapshotTimestamp, RestError> {
        let path = "snapshots/timestamps";
        let body = json!({ "doorbot_ids": [self.device_id] });
        let response = self
            .client
            .request(RestRequest::post(path, Some(body)))
            .await?;
        let parsed: TimestampsBody = response.json(path)?;

        Ok(SnapshotTimestamp {
            timestamp_ms: parsed.timestamps.first().map(|t| t.timestamp).unwrap_or(0),
            response_timestamp_ms: response.response_timestamp_ms,
        })
    }

    pub async fn snapshot_image(&self) -> Result<Bytes, RestError> {
        let path = format!("snapshots/image/{}", self.device_id);
        Ok(self.client.request(RestRequest::get(path)).await?.body)
    }

    pub async fn history(
        &self,
        limit: u32,
        favorites_only: bool,
    ) -> Result<Vec<HistoricalDing>, RestError> {
        let favorites = if favorites_only { "&favorites=1" } else { "" };
        let path = self.doorbot_path(&format!("history?limit={limit}{favorites}"));
        self.client
            .request(RestRequest::get(path.clone()))
            .await?
            .json(&path)
    }

    pub async fn recording_url(&self, ding_id: &str) -> Result<String, RestError> {
        let path = format!("dings/{ding_id}/share/play?disable_redirect=true");
        let body: ShareBody = self
            .client
            .request(RestRequest::get(path.clone()))
            .await?
            .json(&path)?;
        Ok(body.url)
    }
}
