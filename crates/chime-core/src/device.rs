use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Device kinds that run on battery and throttle snapshot timestamp updates.
pub const BATTERY_CAMERA_KINDS: &[&str] = &[
    "doorbot",
    "doorbell",
    "doorbell_v3",
    "doorbell_v4",
    "doorbell_v5",
    "doorbell_scallop_lite",
    "stickup_cam",
    "stickup_cam_v3",
    "stickup_cam_v4",
    "stickup_cam_lunar",
    "cocoa_camera",
];

const CAMERA_MODELS: &[(&str, &str)] = &[
    ("doorbot", "Doorbell"),
    ("doorbell", "Doorbell"),
    ("doorbell_v3", "Doorbell"),
    ("doorbell_v4", "Doorbell 2"),
    ("doorbell_v5", "Doorbell 2"),
    ("doorbell_scallop_lite", "Doorbell 3"),
    ("lpd_v1", "Doorbell Pro"),
    ("lpd_v2", "Doorbell Pro"),
    ("jbox_v1", "Doorbell Elite"),
    ("stickup_cam", "Stick Up Cam"),
    ("stickup_cam_v3", "Stick Up Cam"),
    ("stickup_cam_v4", "Spotlight Cam Battery"),
    ("stickup_cam_lunar", "Stick Up Cam Battery"),
    ("stickup_cam_elite", "Stick Up Cam Wired"),
    ("stickup_cam_mini", "Indoor Cam"),
    ("hp_cam_v1", "Floodlight Cam"),
    ("hp_cam_v2", "Spotlight Cam Wired"),
    ("cocoa_camera", "Stick Up Cam"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAlerts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SirenStatus {
    pub seconds_remaining: u32,
}

/// Immutable view of a device as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub id: u64,
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub siren_status: Option<SirenStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_life: Option<serde_json::Value>,
    #[serde(default)]
    pub alerts: DeviceAlerts,
}

impl DeviceState {
    /// Battery percentage, or `None` when the backend reports something
    /// that is neither a number nor a string starting with one (`"42%"` is
    /// 42).
    pub fn battery_level(&self) -> Option<f64> {
        let level = match self.battery_life.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => parse_leading_number(s)?,
            _ => return None,
        };
        level.is_finite().then_some(level)
    }

    pub fn has_low_battery(&self) -> bool {
        self.alerts.battery.as_deref() == Some("low")
    }

    pub fn is_offline(&self) -> bool {
        self.alerts.connection.as_deref() == Some("offline")
    }

    pub fn has_light(&self) -> bool {
        self.led_status.is_some()
    }

    pub fn has_siren(&self) -> bool {
        self.siren_status.is_some()
    }

    pub fn has_battery(&self) -> bool {
        BATTERY_CAMERA_KINDS.contains(&self.kind.as_str())
    }

    pub fn model(&self) -> &'static str {
        CAMERA_MODELS
            .iter()
            .find(|(kind, _)| *kind == self.kind)
            .map(|(_, model)| *model)
            .unwrap_or("Unknown Model")
    }
}

/// Longest numeric prefix of `raw` after leading whitespace.
fn parse_leading_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim_start();
    (1..=trimmed.len())
        .rev()
        .filter(|&end| trimmed.is_char_boundary(end))
        .find_map(|end| trimmed[..end].parse::<f64>().ok())
}

/// Holds the latest device state and republishes every replacement.
/// Subscribers always see the current value first.
pub struct DeviceStore {
    state_tx: watch::Sender<Arc<DeviceState>>,
    battery_tx: watch::Sender<Option<f64>>,
}

impl DeviceStore {
    pub fn new(initial: DeviceState) -> Self {
        let battery = initial.battery_level();
        let (state_tx, _) = watch::channel(Arc::new(initial));
        let (battery_tx, _) = watch::channel(battery);
        Self {
            state_tx,
            battery_tx,
        }
    }

    pub fn update(&self, state: DeviceState) {
        let battery = state.battery_level();
        debug!(device_id = state.id, battery = ?battery, "device state updated");
        self.state_tx.send_replace(Arc::new(state));
        self.battery_tx.send_if_modified(|current| {
            if *current == battery {
                return false;
            }
            *current = battery;
            true
        });
    }

    pub fn current(&self) -> Arc<DeviceState> {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DeviceState>> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_battery_level(&self) -> watch::Receiver<Option<f64>> {
        self.battery_tx.subscribe()
    }

    pub fn battery_level(&self) -> Option<f64> {
        self.current().battery_level()
    }

    pub fn has_low_battery(&self) -> bool {
        self.current().has_low_battery()
    }

    pub fn is_offline(&self) -> bool {
        self.current().is_offline()
    }
}
