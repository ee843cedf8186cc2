use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use chime_core::api::{fetch_active_dings, fetch_devices};
use chime_core::{Camera, DeviceState, Ding, DingKind, RestClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::OutputFormat;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum WatchEvent {
    Motion {
        ding_id: String,
    },
    Doorbell {
        ding_id: String,
    },
    MotionCleared,
    State {
        name: String,
        offline: bool,
        low_battery: bool,
        battery_level: Option<f64>,
        light: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct StampedEvent {
    pub ts: DateTime<Utc>,
    pub camera_id: u64,
    #[serde(flatten)]
    pub event: WatchEvent,
}

/// Turns a reported ding into a printable event. On-demand dings are the
/// client's own live-view requests and are not shown.
pub(crate) fn ding_event(ding: &Ding) -> Option<WatchEvent> {
    match ding.kind {
        DingKind::Ding => Some(WatchEvent::Doorbell {
            ding_id: ding.id.clone(),
        }),
        DingKind::OnDemand => None,
        _ if ding.is_motion() => Some(WatchEvent::Motion {
            ding_id: ding.id.clone(),
        }),
        _ => None,
    }
}

pub(crate) fn state_event(state: &DeviceState) -> WatchEvent {
    WatchEvent::State {
        name: state.description.clone(),
        offline: state.is_offline(),
        low_battery: state.has_low_battery(),
        battery_level: state.battery_level(),
        light: state.led_status.clone(),
    }
}

/// Remembers which backend dings were already handed to the tracker.
///
/// The backend keeps returning a ding for as long as it is active, so an id
/// is only forgotten once a poll no longer contains it.
pub(crate) struct ActiveDingFilter {
    camera_id: u64,
    seen: HashSet<String>,
}

impl ActiveDingFilter {
    pub fn new(camera_id: u64) -> Self {
        Self {
            camera_id,
            seen: HashSet::new(),
        }
    }

    pub fn ingest(&mut self, dings: Vec<Ding>) -> Vec<Ding> {
        let current: Vec<Ding> = dings
            .into_iter()
            .filter(|d| d.doorbot_id == self.camera_id)
            .collect();
        let fresh = current
            .iter()
            .filter(|d| !self.seen.contains(&d.id))
            .cloned()
            .collect();
        self.seen = current.into_iter().map(|d| d.id).collect();
        fresh
    }
}

/// Suppresses state events identical to the last one printed.
#[derive(Default)]
pub(crate) struct StateChanges {
    last: Option<WatchEvent>,
}

impl StateChanges {
    pub fn observe(&mut self, state: &DeviceState) -> Option<WatchEvent> {
        let event = state_event(state);
        if self.last.as_ref() == Some(&event) {
            return None;
        }
        self.last = Some(event.clone());
        Some(event)
    }
}

pub(crate) fn render(event: &StampedEvent, format: OutputFormat) -> Result<String> {
    let line = match format {
        OutputFormat::Json => serde_json::to_string_pretty(event)?,
        OutputFormat::Ndjson => serde_json::to_string(event)?,
        OutputFormat::Human => {
            let ts = event.ts.format("%H:%M:%S");
            match &event.event {
                WatchEvent::Motion { ding_id } => format!("[{ts}] motion detected (ding {ding_id})"),
                WatchEvent::Doorbell { ding_id } => format!("[{ts}] doorbell pressed (ding {ding_id})"),
                WatchEvent::MotionCleared => format!("[{ts}] motion cleared"),
                WatchEvent::State {
                    name,
                    offline,
                    low_battery,
                    battery_level,
                    light,
                } => {
                    let battery = battery_level
                        .map(|level| format!("{level:.0}%"))
                        .unwrap_or_else(|| "n/a".to_string());
                    format!(
                        "[{ts}] {name}: online={} battery={battery} low_battery={low_battery} light={}",
                        !offline,
                        light.as_deref().unwrap_or("n/a"),
                    )
                }
            }
        }
    };
    Ok(line)
}

fn emit(camera: &Camera, event: WatchEvent, format: OutputFormat) -> Result<()> {
    let stamped = StampedEvent {
        ts: Utc::now(),
        camera_id: camera.id(),
        event,
    };
    println!("{}", render(&stamped, format)?);
    Ok(())
}

async fn poll_active_dings(camera: &Camera, rest: &dyn RestClient, filter: &mut ActiveDingFilter) {
    match fetch_active_dings(rest).await {
        Ok(dings) => {
            for ding in filter.ingest(dings) {
                camera.dings().report_ding(ding);
            }
        }
        Err(err) => warn!(error = %err, "active ding poll failed"),
    }
}

async fn refresh_device(camera: &Camera, rest: &dyn RestClient) {
    match fetch_devices(rest).await {
        Ok(listing) => match listing.find(camera.id()) {
            Some((state, _)) => camera.update_data(state.clone()),
            None => warn!(camera_id = camera.id(), "camera missing from device listing"),
        },
        Err(err) => warn!(error = %err, "device refresh failed"),
    }
}

pub(crate) async fn run_watch(
    camera: &Camera,
    rest: &dyn RestClient,
    poll_interval: Duration,
    format: OutputFormat,
) -> Result<()> {
    let dings = camera.dings();
    let mut new_dings = dings.subscribe_new_dings();
    let mut motion = dings.subscribe_motion();
    let mut states = camera.device().subscribe();
    let mut poll_requests = dings.subscribe_active_ding_requests();
    let mut update_requests = dings.subscribe_update_requests();

    let mut filter = ActiveDingFilter::new(camera.id());
    let mut changes = StateChanges::default();
    if let Some(event) = changes.observe(&states.borrow_and_update()) {
        emit(camera, event, format)?;
    }
    motion.borrow_and_update();

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            _ = ticker.tick() => {
                poll_active_dings(camera, rest, &mut filter).await;
                refresh_device(camera, rest).await;
                debug!(active = dings.active_dings().len(), "poll complete");
            }
            Ok(()) = poll_requests.recv() => {
                poll_active_dings(camera, rest, &mut filter).await;
            }
            Ok(()) = update_requests.recv() => {
                refresh_device(camera, rest).await;
            }
            received = new_dings.recv() => match received {
                Ok(ding) => {
                    if let Some(event) = ding_event(&ding) {
                        emit(camera, event, format)?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "ding feed lagged"),
                Err(RecvError::Closed) => break,
            },
            Ok(()) = motion.changed() => {
                let detected = *motion.borrow_and_update();
                if !detected {
                    emit(camera, WatchEvent::MotionCleared, format)?;
                }
            }
            Ok(()) = states.changed() => {
                let state = states.borrow_and_update().clone();
                if let Some(event) = changes.observe(&state) {
                    emit(camera, event, format)?;
                }
            }
        }
    }

    Ok(())
}
