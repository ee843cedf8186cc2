use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::dings::{ActiveDing, DingTracker};
use crate::error::{CameraError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtpOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srtp_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srtp_salt: Option<String>,
}

impl SrtpOptions {
    /// Field-wise merge where values set on `self` win over `defaults`.
    pub fn or(&self, defaults: &SrtpOptions) -> SrtpOptions {
        SrtpOptions {
            srtp_key: self.srtp_key.clone().or_else(|| defaults.srtp_key.clone()),
            srtp_salt: self.srtp_salt.clone().or_else(|| defaults.srtp_salt.clone()),
        }
    }
}

/// Per-stream SRTP parameters, used both for device defaults and caller
/// overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSrtp {
    pub audio: SrtpOptions,
    pub video: SrtpOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RtpStreamOptions {
    pub port: u16,
    #[serde(flatten)]
    pub srtp: SrtpOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RtpOptions {
    pub address: IpAddr,
    pub audio: RtpStreamOptions,
    pub video: RtpStreamOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SipRoute {
    pub to: String,
    pub from: String,
    pub ding_id: String,
    pub tls_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SipSessionParams {
    pub sip: SipRoute,
    pub rtp: RtpOptions,
}

#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// A negotiated live stream. Owns the RTP sockets for its lifetime.
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    fn video_packets(&self) -> broadcast::Receiver<MediaPacket>;
}

/// SIP/RTP stack that turns negotiated parameters into a live session.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(
        &self,
        params: &SipSessionParams,
        video_socket: UdpSocket,
        audio_socket: UdpSocket,
    ) -> Result<Box<dyn LiveSession>>;
}

#[async_trait]
pub trait PublicAddressResolver: Send + Sync {
    async fn resolve(&self) -> Result<IpAddr>;
}

#[async_trait]
pub trait PortReserver: Send + Sync {
    /// Binds a fresh UDP socket to an unused local port.
    async fn bind_random(&self) -> Result<(UdpSocket, u16)>;
    /// Finds a currently unused port without keeping it bound.
    async fn find_unused_port(&self) -> Result<u16>;
}

pub struct SipSessionHandle {
    params: SipSessionParams,
    session: Box<dyn LiveSession>,
}

impl SipSessionHandle {
    pub fn new(params: SipSessionParams, session: Box<dyn LiveSession>) -> Self {
        Self { params, session }
    }

    pub fn params(&self) -> &SipSessionParams {
        &self.params
    }

    pub async fn start(&self) -> Result<()> {
        self.session.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.session.stop().await
    }

    pub fn video_packets(&self) -> broadcast::Receiver<MediaPacket> {
        self.session.video_packets()
    }
}

/// Anything that can hand out a fresh live session.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn acquire(&self) -> Result<SipSessionHandle>;
}

pub struct SessionAcquirer {
    dings: Arc<DingTracker>,
    consumed: Mutex<HashSet<String>>,
    resolver: Arc<dyn PublicAddressResolver>,
    ports: Arc<dyn PortReserver>,
    transport: Arc<dyn SessionTransport>,
    defaults: StreamSrtp,
}

impl SessionAcquirer {
    pub fn new(
        dings: Arc<DingTracker>,
        resolver: Arc<dyn PublicAddressResolver>,
        ports: Arc<dyn PortReserver>,
        transport: Arc<dyn SessionTransport>,
        defaults: StreamSrtp,
    ) -> Self {
        Self {
            dings,
            consumed: Mutex::new(HashSet::new()),
            resolver,
            ports,
            transport,
            defaults,
        }
    }

    pub fn is_consumed(&self, ding_id: &str) -> bool {
        self.consumed.lock().contains(ding_id)
    }

    /// Newest unconsumed active ding, marked consumed before it is returned.
    fn claim_active_ding(&self) -> Option<Arc<ActiveDing>> {
        let active = self.dings.active_dings();
        let mut consumed = self.consumed.lock();
        active
            .into_iter()
            .rev()
            .find(|ding| consumed.insert(ding.id.clone()))
    }

    async fn claim_ding(&self) -> Result<Arc<ActiveDing>> {
        if let Some(ding) = self.claim_active_ding() {
            debug!(ding_id = %ding.id, "reusing active ding for session");
            return Ok(ding);
        }

        debug!("no unused active ding, requesting on-demand session");
        self.dings
            .request_on_demand_session_where(|ding| self.consumed.lock().insert(ding.id.clone()))
            .await
    }

    pub async fn acquire_with(&self, overrides: &StreamSrtp) -> Result<SipSessionHandle> {
        let (ding, address, (video_socket, video_port), (audio_socket, audio_port)) = tokio::try_join!(
            self.claim_ding(),
            self.resolver.resolve(),
            self.ports.bind_random(),
            self.ports.bind_random(),
        )?;

        let (Some(to), Some(from)) = (ding.sip_to.clone(), ding.sip_from.clone()) else {
            return Err(CameraError::Transport(format!(
                "ding {} carries no sip routing",
                ding.id
            )));
        };
        let tls_port = self.ports.find_unused_port().await?;

        let params = SipSessionParams {
            sip: SipRoute {
                to,
                from,
                ding_id: ding.id.clone(),
                tls_port,
            },
            rtp: RtpOptions {
                address,
                audio: RtpStreamOptions {
                    port: audio_port,
                    srtp: overrides.audio.or(&self.defaults.audio),
                },
                video: RtpStreamOptions {
                    port: video_port,
                    srtp: overrides.video.or(&self.defaults.video),
                },
            },
        };

        let session = self
            .transport
            .open(&params, video_socket, audio_socket)
            .await?;
        info!(
            ding_id = %params.sip.ding_id,
            address = %address,
            video_port,
            audio_port,
            "live session negotiated"
        );

        Ok(SipSessionHandle::new(params, session))
    }
}

#[async_trait]
impl SessionSource for SessionAcquirer {
    async fn acquire(&self) -> Result<SipSessionHandle> {
        self.acquire_with(&StreamSrtp::default()).await
    }
}
