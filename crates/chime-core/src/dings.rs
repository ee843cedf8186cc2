use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tokio::time::{sleep, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::api::CameraApi;
use crate::error::{CameraError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DingKind {
    Motion,
    Ding,
    OnDemand,
    #[serde(other)]
    Other,
}

/// A transient event reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ding {
    #[serde(rename = "id_str")]
    pub id: String,
    #[serde(default)]
    pub doorbot_id: u64,
    pub kind: DingKind,
    #[serde(default)]
    pub motion: bool,
    #[serde(default)]
    pub sip_to: Option<String>,
    #[serde(default)]
    pub sip_from: Option<String>,
    #[serde(default)]
    pub sip_server_ip: Option<String>,
    #[serde(default)]
    pub sip_server_port: Option<u16>,
}

impl Ding {
    pub fn is_motion(&self) -> bool {
        self.motion || self.kind == DingKind::Motion
    }
}

/// One report of a ding. Two reports of the same ding are distinct entries;
/// entries are compared by `seq`, never by value.
#[derive(Debug)]
pub struct ActiveDing {
    seq: u64,
    reported_at: Instant,
    ding: Ding,
}

impl ActiveDing {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn age(&self) -> Duration {
        self.reported_at.elapsed()
    }
}

impl Deref for ActiveDing {
    type Target = Ding;

    fn deref(&self) -> &Ding {
        &self.ding
    }
}

struct TrackerInner {
    api: CameraApi,
    lifetime: Duration,
    next_seq: AtomicU64,
    new_tx: broadcast::Sender<Arc<ActiveDing>>,
    active_tx: watch::Sender<Vec<Arc<ActiveDing>>>,
    motion_tx: watch::Sender<bool>,
    expiries: Mutex<HashMap<u64, AbortHandle>>,
    active_requests_tx: broadcast::Sender<()>,
    update_requests_tx: broadcast::Sender<()>,
}

impl TrackerInner {
    fn remove(&self, seq: u64) -> bool {
        if let Some(timer) = self.expiries.lock().remove(&seq) {
            timer.abort();
        }
        let removed = self.active_tx.send_if_modified(|dings| {
            let before = dings.len();
            dings.retain(|d| d.seq != seq);
            dings.len() != before
        });
        if removed {
            self.refresh_motion();
        }
        removed
    }

    fn refresh_motion(&self) {
        let motion = self.active_tx.borrow().iter().any(|d| d.is_motion());
        self.motion_tx.send_if_modified(|current| {
            if *current == motion {
                return false;
            }
            *current = motion;
            true
        });
    }
}

/// Tracks the set of currently active dings for one device.
pub struct DingTracker {
    inner: Arc<TrackerInner>,
}

impl DingTracker {
    pub fn new(api: CameraApi, lifetime: Duration) -> Self {
        let (new_tx, _) = broadcast::channel(64);
        let (active_tx, _) = watch::channel(Vec::new());
        let (motion_tx, _) = watch::channel(false);
        let (active_requests_tx, _) = broadcast::channel(8);
        let (update_requests_tx, _) = broadcast::channel(8);

        Self {
            inner: Arc::new(TrackerInner {
                api,
                lifetime,
                next_seq: AtomicU64::new(1),
                new_tx,
                active_tx,
                motion_tx,
                expiries: Mutex::new(HashMap::new()),
                active_requests_tx,
                update_requests_tx,
            }),
        }
    }

    /// Records a new ding, announces it, and schedules its expiry. An active
    /// ding with the same id is superseded. Must be called inside a tokio
    /// runtime.
    pub fn report_ding(&self, ding: Ding) -> Arc<ActiveDing> {
        let entry = Arc::new(ActiveDing {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            reported_at: Instant::now(),
            ding,
        });
        info!(
            device_id = self.inner.api.device_id(),
            ding_id = %entry.id,
            kind = ?entry.kind,
            "ding reported"
        );

        let _ = self.inner.new_tx.send(entry.clone());

        let mut superseded = None;
        self.inner.active_tx.send_modify(|dings| {
            if let Some(pos) = dings.iter().position(|d| d.id == entry.id) {
                superseded = Some(dings.remove(pos));
            }
            dings.push(entry.clone());
        });
        if let Some(old) = superseded {
            debug!(ding_id = %old.id, "ding superseded");
            if let Some(timer) = self.inner.expiries.lock().remove(&old.seq) {
                timer.abort();
            }
        }
        self.inner.refresh_motion();

        self.schedule_expiry(entry.seq);
        entry
    }

    fn schedule_expiry(&self, seq: u64) {
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let lifetime = self.inner.lifetime;

        // the timer task takes the same lock in `remove`, so it cannot run
        // ahead of the insert below
        let mut expiries = self.inner.expiries.lock();
        let task = tokio::spawn(async move {
            sleep(lifetime).await;
            if let Some(inner) = weak.upgrade() {
                if inner.remove(seq) {
                    debug!(seq, "ding expired");
                }
            }
        });
        expiries.insert(seq, task.abort_handle());
    }

    /// Removes one specific report before its expiry.
    pub fn remove_ding(&self, ding: &ActiveDing) -> bool {
        self.inner.remove(ding.seq)
    }

    pub fn active_dings(&self) -> Vec<Arc<ActiveDing>> {
        self.inner.active_tx.borrow().clone()
    }

    pub fn subscribe_new_dings(&self) -> broadcast::Receiver<Arc<ActiveDing>> {
        self.inner.new_tx.subscribe()
    }

    pub fn subscribe_active_dings(&self) -> watch::Receiver<Vec<Arc<ActiveDing>>> {
        self.inner.active_tx.subscribe()
    }

    pub fn subscribe_motion(&self) -> watch::Receiver<bool> {
        self.inner.motion_tx.subscribe()
    }

    pub fn is_motion_detected(&self) -> bool {
        *self.inner.motion_tx.borrow()
    }

    pub fn doorbell_presses(&self) -> impl Stream<Item = Arc<ActiveDing>> {
        BroadcastStream::new(self.inner.new_tx.subscribe())
            .filter_map(|item| item.ok().filter(|d| d.kind == DingKind::Ding))
    }

    /// Fires whenever the tracker needs the application layer to poll the
    /// backend for active dings.
    pub fn subscribe_active_ding_requests(&self) -> broadcast::Receiver<()> {
        self.inner.active_requests_tx.subscribe()
    }

    pub fn request_update(&self) {
        let _ = self.inner.update_requests_tx.send(());
    }

    pub fn subscribe_update_requests(&self) -> broadcast::Receiver<()> {
        self.inner.update_requests_tx.subscribe()
    }

    pub async fn request_on_demand_session(&self) -> Result<Arc<ActiveDing>> {
        self.request_on_demand_session_where(|_| true).await
    }

    /// Asks the backend to start a live stream and waits for the resulting
    /// `on_demand` ding. `accept` is consulted for every candidate, letting
    /// the caller claim it atomically. No timeout is applied here.
    pub async fn request_on_demand_session_where<F>(&self, mut accept: F) -> Result<Arc<ActiveDing>>
    where
        F: FnMut(&ActiveDing) -> bool + Send,
    {
        let mut new_dings = self.inner.new_tx.subscribe();
        self.inner.api.start_video_on_demand().await?;
        let _ = self.inner.active_requests_tx.send(());

        loop {
            match new_dings.recv().await {
                Ok(ding) if ding.kind == DingKind::OnDemand && accept(ding.as_ref()) => {
                    return Ok(ding)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ding feed lagged while waiting for on-demand ding");
                }
                Err(RecvError::Closed) => return Err(CameraError::DingFeedClosed),
            }
        }
    }
}
