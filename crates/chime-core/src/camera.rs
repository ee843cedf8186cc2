use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use crate::api::{CameraApi, CameraHealth, HistoricalDing, RestClient};
use crate::config::CameraConfig;
use crate::device::{DeviceState, DeviceStore, SirenStatus};
use crate::dings::DingTracker;
use crate::error::{CameraError, Result};
use crate::network::{HttpPublicAddressResolver, LocalPortReserver};
use crate::recording::{FfmpegRemuxer, RecordingPipeline, Remuxer};
use crate::session::{
    PortReserver, PublicAddressResolver, SessionAcquirer, SessionTransport, SipSessionHandle,
    StreamSrtp,
};
use crate::snapshot::SnapshotCache;

pub struct CameraBuilder {
    initial: DeviceState,
    is_doorbot: bool,
    rest: Arc<dyn RestClient>,
    config: CameraConfig,
    transport: Option<Arc<dyn SessionTransport>>,
    resolver: Option<Arc<dyn PublicAddressResolver>>,
    ports: Option<Arc<dyn PortReserver>>,
    remuxer: Option<Arc<dyn Remuxer>>,
    default_srtp: StreamSrtp,
}

impl CameraBuilder {
    pub fn new(initial: DeviceState, rest: Arc<dyn RestClient>) -> Self {
        Self {
            initial,
            is_doorbot: false,
            rest,
            config: CameraConfig::default(),
            transport: None,
            resolver: None,
            ports: None,
            remuxer: None,
            default_srtp: StreamSrtp::default(),
        }
    }

    pub fn doorbot(mut self, is_doorbot: bool) -> Self {
        self.is_doorbot = is_doorbot;
        self
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = config;
        self
    }

    pub fn session_transport(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn public_address_resolver(mut self, resolver: Arc<dyn PublicAddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn port_reserver(mut self, ports: Arc<dyn PortReserver>) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn remuxer(mut self, remuxer: Arc<dyn Remuxer>) -> Self {
        self.remuxer = Some(remuxer);
        self
    }

    pub fn default_srtp(mut self, srtp: StreamSrtp) -> Self {
        self.default_srtp = srtp;
        self
    }

    pub fn build(self) -> Result<Camera> {
        let api = CameraApi::new(self.rest, self.initial.id);
        let has_light = self.initial.has_light();
        let has_siren = self.initial.has_siren();
        let device = Arc::new(DeviceStore::new(self.initial));
        let dings = Arc::new(DingTracker::new(api.clone(), self.config.ding_lifetime));
        let snapshots = SnapshotCache::new(api.clone(), device.clone(), &self.config);

        let live = match self.transport {
            Some(transport) => {
                let resolver = match self.resolver {
                    Some(resolver) => resolver,
                    None => Arc::new(HttpPublicAddressResolver::with_defaults()?),
                };
                let ports = self
                    .ports
                    .unwrap_or_else(|| Arc::new(LocalPortReserver::default()));
                let remuxer = self
                    .remuxer
                    .unwrap_or_else(|| Arc::new(FfmpegRemuxer::new(self.config.ffmpeg_path.clone())));
                let sessions = Arc::new(SessionAcquirer::new(
                    dings.clone(),
                    resolver,
                    ports,
                    transport,
                    self.default_srtp,
                ));
                let recorder = RecordingPipeline::new(sessions.clone(), remuxer, &self.config);
                Some(LiveStreaming { sessions, recorder })
            }
            None => None,
        };

        Ok(Camera {
            api,
            is_doorbot: self.is_doorbot,
            has_light,
            has_siren,
            device,
            dings,
            snapshots,
            live,
        })
    }
}

struct LiveStreaming {
    sessions: Arc<SessionAcquirer>,
    recorder: RecordingPipeline,
}

/// One camera or doorbell and everything tracked for it.
pub struct Camera {
    api: CameraApi,
    is_doorbot: bool,
    has_light: bool,
    has_siren: bool,
    device: Arc<DeviceStore>,
    dings: Arc<DingTracker>,
    snapshots: SnapshotCache,
    live: Option<LiveStreaming>,
}

impl Camera {
    pub fn id(&self) -> u64 {
        self.api.device_id()
    }

    pub fn name(&self) -> String {
        self.device.current().description.clone()
    }

    pub fn is_doorbot(&self) -> bool {
        self.is_doorbot
    }

    pub fn has_light(&self) -> bool {
        self.has_light
    }

    pub fn has_siren(&self) -> bool {
        self.has_siren
    }

    pub fn device(&self) -> &Arc<DeviceStore> {
        &self.device
    }

    pub fn dings(&self) -> &Arc<DingTracker> {
        &self.dings
    }

    pub fn snapshots(&self) -> &SnapshotCache {
        &self.snapshots
    }

    pub fn update_data(&self, state: DeviceState) {
        self.device.update(state);
    }

    /// Returns `false` without touching the backend when the device has no
    /// light.
    pub async fn set_light(&self, on: bool) -> Result<bool> {
        if !self.has_light {
            return Ok(false);
        }
        self.api.set_light(on).await?;

        let mut state = (*self.device.current()).clone();
        state.led_status = Some(if on { "on" } else { "off" }.to_string());
        self.device.update(state);
        info!(camera_id = self.id(), on, "light toggled");
        Ok(true)
    }

    pub async fn set_siren(&self, on: bool) -> Result<bool> {
        if !self.has_siren {
            return Ok(false);
        }
        self.api.set_siren(on).await?;

        let mut state = (*self.device.current()).clone();
        state.siren_status = Some(SirenStatus {
            seconds_remaining: 1,
        });
        self.device.update(state);
        info!(camera_id = self.id(), on, "siren toggled");
        Ok(true)
    }

    pub async fn health(&self) -> Result<CameraHealth> {
        Ok(self.api.health().await?)
    }

    pub async fn history(&self, limit: u32, favorites_only: bool) -> Result<Vec<HistoricalDing>> {
        Ok(self.api.history(limit, favorites_only).await?)
    }

    pub async fn recording_url(&self, ding_id: &str) -> Result<String> {
        Ok(self.api.recording_url(ding_id).await?)
    }

    pub async fn snapshot(&self, allow_stale: bool) -> Result<Bytes> {
        self.snapshots.fetch(allow_stale).await
    }

    fn live(&self) -> Result<&LiveStreaming> {
        self.live
            .as_ref()
            .ok_or_else(|| CameraError::Transport("no session transport configured".to_string()))
    }

    pub async fn create_session(&self, overrides: &StreamSrtp) -> Result<SipSessionHandle> {
        self.live()?.sessions.acquire_with(overrides).await
    }

    /// Records `duration` of live video to `<output_base>.mp4`.
    pub async fn record_to_file(
        &self,
        output_base: impl Into<PathBuf>,
        duration: Duration,
    ) -> Result<PathBuf> {
        self.live()?.recorder.record(output_base, duration).await
    }
}
