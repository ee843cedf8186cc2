use crate::watch::{ding_event, render, ActiveDingFilter, StampedEvent, StateChanges, WatchEvent};
use crate::OutputFormat;
use chime_core::{DeviceState, Ding, DingKind};
use chrono::{TimeZone, Utc};
use serde_json::json;

fn ding(id: &str, doorbot_id: u64, kind: DingKind) -> Ding {
    Ding {
        id: id.to_string(),
        doorbot_id,
        kind,
        motion: false,
        sip_to: None,
        sip_from: None,
        sip_server_ip: None,
        sip_server_port: None,
    }
}

fn device(value: serde_json::Value) -> DeviceState {
    serde_json::from_value(value).expect("device state")
}

#[test]
fn filter_passes_each_ding_once_while_it_stays_active() {
    // Arrange
    let mut filter = ActiveDingFilter::new(7);

    // Act
    let first = filter.ingest(vec![ding("a", 7, DingKind::Motion)]);
    let second = filter.ingest(vec![
        ding("a", 7, DingKind::Motion),
        ding("b", 7, DingKind::Ding),
    ]);

    // Assert
    let ids = |dings: &[Ding]| dings.iter().map(|d| d.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), vec!["a"]);
    assert_eq!(ids(&second), vec!["b"]);
}

#[test]
fn filter_ignores_other_cameras_and_forgets_ended_dings() {
    let mut filter = ActiveDingFilter::new(7);

    assert!(filter.ingest(vec![ding("x", 8, DingKind::Ding)]).is_empty());
    assert_eq!(filter.ingest(vec![ding("a", 7, DingKind::Ding)]).len(), 1);
    assert!(filter.ingest(vec![]).is_empty());

    // the backend may reuse the id for a later event
    assert_eq!(filter.ingest(vec![ding("a", 7, DingKind::Ding)]).len(), 1);
}

#[test]
fn ding_events_follow_kind() {
    let mut flagged = ding("c", 7, DingKind::Other);
    flagged.motion = true;

    assert_eq!(
        ding_event(&ding("a", 7, DingKind::Ding)),
        Some(WatchEvent::Doorbell { ding_id: "a".into() })
    );
    assert_eq!(
        ding_event(&ding("b", 7, DingKind::Motion)),
        Some(WatchEvent::Motion { ding_id: "b".into() })
    );
    assert_eq!(
        ding_event(&flagged),
        Some(WatchEvent::Motion { ding_id: "c".into() })
    );
    assert_eq!(ding_event(&ding("d", 7, DingKind::OnDemand)), None);
}

#[test]
fn state_changes_are_reported_once() {
    // Arrange
    let mut changes = StateChanges::default();
    let online = device(json!({ "id": 7, "kind": "doorbell_v3", "description": "Front", "battery_life": 80 }));
    let offline = device(json!({
        "id": 7,
        "kind": "doorbell_v3",
        "description": "Front",
        "battery_life": 80,
        "alerts": { "connection": "offline" }
    }));

    // Act & Assert
    assert!(changes.observe(&online).is_some());
    assert!(changes.observe(&online).is_none(), "identical refresh is suppressed");
    match changes.observe(&offline) {
        Some(WatchEvent::State { offline, battery_level, .. }) => {
            assert!(offline);
            assert_eq!(battery_level, Some(80.0));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn render_formats_human_and_ndjson() {
    // Arrange
    let event = StampedEvent {
        ts: Utc
            .with_ymd_and_hms(2026, 2, 15, 8, 30, 5)
            .single()
            .expect("valid date"),
        camera_id: 7,
        event: WatchEvent::Doorbell {
            ding_id: "123".into(),
        },
    };

    // Act
    let human = render(&event, OutputFormat::Human).expect("human");
    let line = render(&event, OutputFormat::Ndjson).expect("ndjson");

    // Assert
    assert_eq!(human, "[08:30:05] doorbell pressed (ding 123)");
    assert!(!line.contains('\n'));
    let parsed: serde_json::Value = serde_json::from_str(&line).expect("valid json");
    assert_eq!(parsed["event"], "doorbell");
    assert_eq!(parsed["ding_id"], "123");
    assert_eq!(parsed["camera_id"], 7);
}
