use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::api::Method;
use crate::camera::{Camera, CameraBuilder};
use crate::device::{DeviceState, SirenStatus};
use crate::dings::DingKind;
use crate::error::CameraError;
use crate::session::StreamSrtp;
use crate::test_support::{device_state, ding, ok_json, FakeResolver, FakeRest, FakeTransport};

fn floodlight() -> DeviceState {
    DeviceState {
        led_status: Some("off".to_string()),
        siren_status: Some(SirenStatus {
            seconds_remaining: 0,
        }),
        ..device_state("hp_cam_v1")
    }
}

fn camera(state: DeviceState, rest: Arc<FakeRest>) -> Camera {
    CameraBuilder::new(state, rest).build().expect("build camera")
}

#[tokio::test]
async fn light_toggle_is_a_no_op_without_a_light() {
    let rest = FakeRest::new(|_| ok_json(json!({})));
    let camera = camera(device_state("doorbell_v3"), rest.clone());

    assert!(!camera.has_light());
    assert!(!camera.set_light(true).await.expect("set light"));
    assert!(!camera.set_siren(true).await.expect("set siren"));
    assert!(rest.requests().is_empty());
}

#[tokio::test]
async fn light_toggle_updates_state_optimistically() {
    // Arrange
    let rest = FakeRest::new(|_| ok_json(json!({})));
    let camera = camera(floodlight(), rest.clone());
    let mut states = camera.device().subscribe();
    states.borrow_and_update();

    // Act
    let applied = camera.set_light(true).await.expect("set light");

    // Assert
    assert!(applied);
    let requests = rest.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Put);
    assert_eq!(requests[0].path, "doorbots/4242/floodlight_light_on");
    assert!(states.has_changed().expect("store alive"));
    assert_eq!(states.borrow_and_update().led_status.as_deref(), Some("on"));
}

#[tokio::test]
async fn siren_toggle_marks_siren_as_sounding() {
    let rest = FakeRest::new(|_| ok_json(json!({})));
    let camera = camera(floodlight(), rest.clone());

    assert!(camera.set_siren(true).await.expect("set siren"));

    assert_eq!(rest.count("doorbots/4242/siren_on"), 1);
    let siren = camera.device().current().siren_status.clone();
    assert_eq!(siren, Some(SirenStatus { seconds_remaining: 1 }));
}

#[tokio::test]
async fn backend_failure_leaves_state_untouched() {
    let rest = FakeRest::new(|request| {
        Err(crate::error::RestError::Status {
            path: request.path.clone(),
            status: 500,
        })
    });
    let camera = camera(floodlight(), rest);

    let result = camera.set_light(true).await;

    assert!(matches!(result, Err(CameraError::Rest(_))));
    assert_eq!(camera.device().current().led_status.as_deref(), Some("off"));
}

#[tokio::test]
async fn live_operations_need_a_session_transport() {
    let rest = FakeRest::new(|_| ok_json(json!({})));
    let camera = camera(floodlight(), rest);

    let session = camera.create_session(&StreamSrtp::default()).await;
    let recording = camera
        .record_to_file("/tmp/never", Duration::from_secs(5))
        .await;

    assert!(matches!(session, Err(CameraError::Transport(_))));
    assert!(matches!(recording, Err(CameraError::Transport(_))));
}

#[tokio::test]
async fn create_session_claims_an_active_ding() {
    // Arrange
    let rest = FakeRest::new(|_| ok_json(json!({})));
    let transport = FakeTransport::new();
    let camera = CameraBuilder::new(device_state("doorbell_v3"), rest)
        .doorbot(true)
        .session_transport(transport.clone())
        .public_address_resolver(Arc::new(FakeResolver))
        .build()
        .expect("build camera");
    camera.dings().report_ding(ding("9001", DingKind::Ding));

    // Act
    let session = camera
        .create_session(&StreamSrtp::default())
        .await
        .expect("session");

    // Assert
    assert_eq!(session.params().sip.ding_id, "9001");
    assert_eq!(transport.opened.lock().len(), 1);
}

#[tokio::test]
async fn history_and_recording_url_parse_backend_payloads() {
    // Arrange
    let rest = FakeRest::new(|request| {
        if request.path.starts_with("doorbots/4242/history") {
            ok_json(json!([{
                "id": 6500907085284961754u64,
                "created_at": "2024-05-01T12:30:00.000Z",
                "kind": "motion",
                "answered": false,
                "favorite": true,
                "recording": { "status": "ready" }
            }]))
        } else {
            ok_json(json!({ "url": "https://share.example/clip.mp4" }))
        }
    });
    let camera = camera(device_state("doorbell_v3"), rest.clone());

    // Act
    let history = camera.history(5, true).await.expect("history");
    let url = camera
        .recording_url("6500907085284961754")
        .await
        .expect("recording url");

    // Assert
    assert_eq!(history.len(), 1);
    assert!(history[0].favorite);
    assert_eq!(history[0].recording.as_ref().map(|r| r.status.as_str()), Some("ready"));
    assert_eq!(url, "https://share.example/clip.mp4");
    assert_eq!(rest.count("doorbots/4242/history?limit=5&favorites=1"), 1);
    assert_eq!(
        rest.count("dings/6500907085284961754/share/play?disable_redirect=true"),
        1
    );
}

#[tokio::test]
async fn health_unwraps_device_health() {
    let rest = FakeRest::new(|_| {
        ok_json(json!({
            "device_health": {
                "id": 4242,
                "wifi_name": "home",
                "latest_signal_strength": -58,
                "battery_percentage": "100",
                "transformer_voltage": 22
            }
        }))
    });
    let camera = camera(device_state("doorbell_v3"), rest);

    let health = camera.health().await.expect("health");

    assert_eq!(health.wifi_name.as_deref(), Some("home"));
    assert_eq!(health.latest_signal_strength, Some(-58));
    assert_eq!(health.extra.get("transformer_voltage"), Some(&json!(22)));
}
