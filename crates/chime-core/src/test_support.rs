use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::api::{CameraApi, RestClient, RestRequest, RestResponse};
use crate::device::{DeviceAlerts, DeviceState};
use crate::dings::{Ding, DingKind};
use crate::error::{RestError, Result};
use crate::session::{
    LiveSession, MediaPacket, PublicAddressResolver, SessionTransport, SipSessionParams,
};

pub const DEVICE_ID: u64 = 4242;
pub const SERVER_NOW_MS: i64 = 1_700_000_000_000;

type Handler = dyn Fn(&RestRequest) -> std::result::Result<RestResponse, RestError> + Send + Sync;

/// Scripted REST backend that records every request it sees.
pub struct FakeRest {
    handler: Box<Handler>,
    delay: Duration,
    requests: Mutex<Vec<RestRequest>>,
}

impl FakeRest {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&RestRequest) -> std::result::Result<RestResponse, RestError> + Send + Sync + 'static,
    {
        Self::with_delay(Duration::ZERO, handler)
    }

    pub fn with_delay<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&RestRequest) -> std::result::Result<RestResponse, RestError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, path_prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path.starts_with(path_prefix))
            .count()
    }
}

#[async_trait]
impl RestClient for FakeRest {
    async fn request(&self, request: RestRequest) -> std::result::Result<RestResponse, RestError> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(&request)
    }
}

pub fn ok_body(body: impl Into<Bytes>) -> std::result::Result<RestResponse, RestError> {
    Ok(RestResponse {
        body: body.into(),
        response_timestamp_ms: SERVER_NOW_MS,
    })
}

pub fn ok_json(value: serde_json::Value) -> std::result::Result<RestResponse, RestError> {
    ok_body(serde_json::to_vec(&value).expect("serialize"))
}

/// Snapshot timestamp response for a capture `age_ms` before server time.
pub fn timestamp_response(age_ms: i64) -> std::result::Result<RestResponse, RestError> {
    let timestamps = if age_ms < 0 {
        json!({ "timestamps": [] })
    } else {
        json!({ "timestamps": [{ "doorbot_id": DEVICE_ID, "timestamp": SERVER_NOW_MS - age_ms }] })
    };
    ok_json(timestamps)
}

pub fn device_state(kind: &str) -> DeviceState {
    DeviceState {
        id: DEVICE_ID,
        kind: kind.to_string(),
        description: "Front Door".to_string(),
        led_status: None,
        siren_status: None,
        battery_life: None,
        alerts: DeviceAlerts::default(),
    }
}

pub fn api(rest: Arc<FakeRest>) -> CameraApi {
    CameraApi::new(rest, DEVICE_ID)
}

pub fn ding(id: &str, kind: DingKind) -> Ding {
    Ding {
        id: id.to_string(),
        doorbot_id: DEVICE_ID,
        kind,
        motion: false,
        sip_to: Some(format!("sip:{id}@ring.com:15063;transport=tls")),
        sip_from: Some("sip:client@ring.com".to_string()),
        sip_server_ip: None,
        sip_server_port: None,
    }
}

pub struct FakeResolver;

#[async_trait]
impl PublicAddressResolver for FakeResolver {
    async fn resolve(&self) -> Result<IpAddr> {
        Ok(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
    }
}

/// Live session whose media feed is driven by the test.
pub struct FakeSession {
    packets: broadcast::Sender<MediaPacket>,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    emit_on_start: usize,
}

impl FakeSession {
    pub fn new(emit_on_start: usize) -> Arc<Self> {
        let (packets, _) = broadcast::channel(256);
        Arc::new(Self {
            packets,
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            emit_on_start,
        })
    }
}

#[async_trait]
impl LiveSession for Arc<FakeSession> {
    async fn start(&self) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        for seq in 0..self.emit_on_start {
            let _ = self.packets.send(MediaPacket {
                sequence_number: seq as u16,
                timestamp: seq as u32 * 3000,
                payload: Bytes::from(vec![0, 0, 0, 1, seq as u8]),
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn video_packets(&self) -> broadcast::Receiver<MediaPacket> {
        self.packets.subscribe()
    }
}

pub struct FakeTransport {
    pub opened: Mutex<Vec<SipSessionParams>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn open(
        &self,
        params: &SipSessionParams,
        _video_socket: UdpSocket,
        _audio_socket: UdpSocket,
    ) -> Result<Box<dyn LiveSession>> {
        self.opened.lock().push(params.clone());
        Ok(Box::new(FakeSession::new(0)))
    }
}
