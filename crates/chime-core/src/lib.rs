pub mod api;
pub mod camera;
pub mod config;
pub mod device;
pub mod dings;
pub mod error;
pub mod network;
pub mod recording;
pub mod session;
pub mod snapshot;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod camera_tests;

pub use api::{CameraApi, CameraHealth, HistoricalDing, HttpRestClient, RestClient, RestRequest, RestResponse};
pub use camera::{Camera, CameraBuilder};
pub use config::CameraConfig;
pub use device::{DeviceState, DeviceStore};
pub use dings::{ActiveDing, Ding, DingKind, DingTracker};
pub use error::{CameraError, RestError, Result};
pub use recording::{FfmpegRemuxer, FileStreamWriter, RecordingJob, RecordingPipeline, Remuxer};
pub use session::{
    LiveSession, MediaPacket, PortReserver, PublicAddressResolver, SessionAcquirer, SessionSource,
    SessionTransport, SipSessionHandle, SrtpOptions, StreamSrtp,
};
pub use snapshot::SnapshotCache;
