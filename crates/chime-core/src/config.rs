use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// How long a reported ding stays in the active set.
    pub ding_lifetime: Duration,
    pub snapshot_poll_interval: Duration,
    pub snapshot_poll_ceiling: Duration,
    pub battery_snapshot_lifetime: Duration,
    pub wired_snapshot_lifetime: Duration,
    pub session_attempts: u32,
    pub session_attempt_timeout: Duration,
    pub media_grace: Duration,
    pub ffmpeg_path: String,
}

impl CameraConfig {
    pub fn snapshot_poll_attempts(&self) -> u32 {
        let interval = self.snapshot_poll_interval.as_millis().max(1);
        (self.snapshot_poll_ceiling.as_millis() / interval) as u32
    }

    pub fn snapshot_lifetime(&self, has_battery: bool) -> Duration {
        if has_battery {
            self.battery_snapshot_lifetime
        } else {
            self.wired_snapshot_lifetime
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            ding_lifetime: Duration::from_secs(65),
            snapshot_poll_interval: Duration::from_millis(500),
            snapshot_poll_ceiling: Duration::from_secs(30),
            // battery cams only refresh their timestamp every 10 minutes
            battery_snapshot_lifetime: Duration::from_secs(600),
            wired_snapshot_lifetime: Duration::from_secs(30),
            session_attempts: 5,
            session_attempt_timeout: Duration::from_millis(500),
            media_grace: Duration::from_millis(500),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}
