//! Staleness-aware, single-flight cache of the latest device snapshot.
//!
//! A refresh first checks the locally tracked capture time. When it is too
//! old the backend's snapshot timestamp is polled until the device reports a
//! capture inside the freshness window, and only then is the image fetched.
//! Concurrent callers share one in-flight refresh.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::api::CameraApi;
use crate::config::CameraConfig;
use crate::device::DeviceStore;
use crate::error::{CameraError, Result};

type InFlightRefresh = Shared<BoxFuture<'static, Result<Bytes>>>;

#[derive(Default)]
struct CacheState {
    last_local_timestamp: Option<Instant>,
    last_image: Option<Bytes>,
    in_flight: Option<InFlightRefresh>,
}

struct SnapshotInner {
    api: CameraApi,
    device: Arc<DeviceStore>,
    lifetime: Duration,
    poll_interval: Duration,
    max_attempts: u32,
    state: Mutex<CacheState>,
}

pub struct SnapshotCache {
    inner: Arc<SnapshotInner>,
}

impl SnapshotCache {
    /// The freshness window is chosen here from the device class and stays
    /// fixed for the lifetime of the cache.
    pub fn new(api: CameraApi, device: Arc<DeviceStore>, config: &CameraConfig) -> Self {
        let lifetime = config.snapshot_lifetime(device.current().has_battery());
        Self {
            inner: Arc::new(SnapshotInner {
                api,
                device,
                lifetime,
                poll_interval: config.snapshot_poll_interval,
                max_attempts: config.snapshot_poll_attempts(),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.inner.lifetime
    }

    pub fn last_image(&self) -> Option<Bytes> {
        self.inner.state.lock().last_image.clone()
    }

    /// Returns a snapshot no older than the freshness window. With
    /// `allow_stale`, a failed refresh or image fetch falls back to the last
    /// good image.
    pub async fn fetch(&self, allow_stale: bool) -> Result<Bytes> {
        let (refresh, fallback) = {
            let mut state = self.inner.state.lock();
            let fallback = state.last_image.clone();
            let refresh = match state.in_flight.clone() {
                Some(pending) => pending,
                None => {
                    let pending = SnapshotInner::refresh_and_fetch(self.inner.clone())
                        .boxed()
                        .shared();
                    state.in_flight = Some(pending.clone());
                    pending
                }
            };
            (refresh, fallback)
        };

        // a failed fetch clears the cache, so fall back to what was cached
        // when this call started
        match refresh.await {
            Ok(image) => Ok(image),
            Err(err) if allow_stale => match fallback {
                Some(image) => {
                    warn!(
                        device_id = self.inner.api.device_id(),
                        error = %err,
                        "snapshot refresh failed, serving last good image"
                    );
                    Ok(image)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}

impl SnapshotInner {
    async fn refresh_and_fetch(self: Arc<Self>) -> Result<Bytes> {
        let outcome = self.run_refresh().await;
        self.state.lock().in_flight = None;
        outcome
    }

    async fn run_refresh(&self) -> Result<Bytes> {
        if self.is_locally_fresh() {
            let cached = self.state.lock().last_image.clone();
            if let Some(image) = cached {
                return Ok(image);
            }
        } else {
            self.poll_until_fresh().await?;
        }

        match self.api.snapshot_image().await {
            Ok(image) => {
                debug!(device_id = self.api.device_id(), len = image.len(), "snapshot fetched");
                self.state.lock().last_image = Some(image.clone());
                Ok(image)
            }
            Err(err) => {
                // never serve a reference to a failed fetch
                self.state.lock().last_image = None;
                Err(CameraError::SnapshotFetchFailed(err.to_string()))
            }
        }
    }

    fn is_locally_fresh(&self) -> bool {
        let Some(captured) = self.state.lock().last_local_timestamp else {
            return false;
        };
        let age = captured.elapsed();
        if age < self.lifetime {
            info!(
                device_id = self.api.device_id(),
                age_ms = age.as_millis() as u64,
                "snapshot is still within its lifetime"
            );
            return true;
        }
        false
    }

    async fn poll_until_fresh(&self) -> Result<()> {
        for attempt in 1..=self.max_attempts {
            let reading = self.api.snapshot_timestamp().await?;

            if reading.timestamp_ms == 0 && self.device.is_offline() {
                return Err(CameraError::DeviceOffline {
                    device: self.device.current().description.clone(),
                });
            }

            let remote_age = Duration::from_millis(
                reading.response_timestamp_ms.abs_diff(reading.timestamp_ms),
            );
            self.state.lock().last_local_timestamp = if reading.timestamp_ms == 0 {
                None
            } else {
                Instant::now().checked_sub(remote_age)
            };

            if remote_age < self.lifetime {
                debug!(
                    device_id = self.api.device_id(),
                    attempt,
                    remote_age_ms = remote_age.as_millis() as u64,
                    "snapshot timestamp is fresh"
                );
                return Ok(());
            }

            debug!(
                device_id = self.api.device_id(),
                attempt,
                remote_age_ms = remote_age.as_millis() as u64,
                "snapshot timestamp still stale"
            );
            sleep(self.poll_interval).await;
        }

        Err(CameraError::SnapshotRefreshTimeout {
            attempts: self.max_attempts,
        })
    }
}
